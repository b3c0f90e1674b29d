// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Registration records.
//!
//! Two records are the same registration when their `(name, host)` pair
//! matches. Every other field is payload and does not take part in equality
//! or hashing.

use crate::connection::ProxyAddress;
use crate::error::Result;
use crate::topic::Topic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Kind of actor a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerType {
    /// Publishes on the record's topic.
    Publisher,
    /// Subscribes to the record's topic.
    Subscriber,
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerType::Publisher => f.write_str("publisher"),
            OwnerType::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// An actor registered under a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Actor name.
    pub name: String,
    /// Host of the proxy the actor uses.
    pub host: String,
    /// Publish port of that proxy.
    pub port: u16,
    /// Topic domain.
    pub domain: String,
    /// Topic subject.
    pub subject: String,
    /// Topic type.
    #[serde(rename = "type")]
    pub type_: String,
    /// Publisher or subscriber.
    pub owner_type: OwnerType,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

impl Registration {
    /// Record for actor `name` on `topic`, reachable through `proxy`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        topic: &Topic,
        proxy: &ProxyAddress,
        owner_type: OwnerType,
    ) -> Self {
        Self {
            name: name.into(),
            host: proxy.host().to_string(),
            port: proxy.pub_port(),
            domain: topic.domain().to_string(),
            subject: topic.subject().to_string(),
            type_: topic.type_().to_string(),
            owner_type,
            description: description.into(),
        }
    }

    /// Topic this record is filed under.
    pub fn topic(&self) -> Result<Topic> {
        Topic::build_with_type(&self.domain, &self.subject, &self.type_)
    }

    /// Proxy the actor is reachable through.
    pub fn proxy(&self) -> ProxyAddress {
        ProxyAddress::new(self.host.clone(), self.port)
    }
}

impl PartialEq for Registration {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.host == other.host
    }
}

impl Eq for Registration {}

impl Hash for Registration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.host.hash(state);
    }
}
