// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Client side of the registrar protocol.

use super::database::RegistrationFilter;
use super::protocol::{decode_reply, encode_request, Query, RequestData, RequestKind};
use super::record::{OwnerType, Registration};
use crate::connection::{ProxyAddress, RegAddress};
use crate::context::Context;
use crate::error::Result;
use crate::topic::Topic;
use crate::transport::ReqSocket;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Default registrar request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Talks to one registrar.
#[derive(Debug)]
pub struct RegistrarDriver {
    address: RegAddress,
    sender: String,
    socket: ReqSocket,
    timeout: Duration,
}

impl RegistrarDriver {
    /// Driver for the registrar at `address`, identifying itself as
    /// `sender`.
    pub fn new(ctx: &Arc<Context>, address: RegAddress, sender: impl Into<String>) -> Result<Self> {
        let socket = ctx.req_socket(address.socket_addr()?)?;
        Ok(Self {
            address,
            sender: sender.into(),
            socket,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registrar address.
    pub fn address(&self) -> &RegAddress {
        &self.address
    }

    fn request(&self, kind: RequestKind, data: RequestData) -> Result<Vec<Registration>> {
        let frames = encode_request(kind, &self.sender, &data)?;
        let reply = self.socket.request(&frames, self.timeout)?;
        decode_reply(kind, &reply)
    }

    /// Register `record` as its owner type.
    pub fn add_registration(&self, record: &Registration) -> Result<()> {
        let kind = RequestKind::register(record.owner_type);
        self.request(kind, RequestData::Record(record.clone()))?;
        Ok(())
    }

    /// Remove `record`.
    pub fn remove_registration(&self, record: &Registration) -> Result<()> {
        let kind = RequestKind::remove(record.owner_type);
        self.request(kind, RequestData::Record(record.clone()))?;
        Ok(())
    }

    /// Remove every publisher and subscriber on `host`.
    pub fn remove_all(&self, host: &str) -> Result<()> {
        self.request(RequestKind::RemoveAll, RequestData::Host(host.to_string()))?;
        Ok(())
    }

    fn topic_query(&self, query: Query, topic: &Topic, owner: OwnerType) -> Result<HashSet<Registration>> {
        let template = Registration::new(
            self.sender.clone(),
            "",
            topic,
            &ProxyAddress::new(String::new(), 0),
            owner,
        );
        let records = self.request(RequestKind::query(query, owner), RequestData::Record(template))?;
        Ok(records.into_iter().collect())
    }

    /// `owner` records on parent topics of `topic`.
    pub fn find(&self, topic: &Topic, owner: OwnerType) -> Result<HashSet<Registration>> {
        self.topic_query(Query::Find, topic, owner)
    }

    /// `owner` records on child topics of `topic`.
    pub fn rfind(&self, topic: &Topic, owner: OwnerType) -> Result<HashSet<Registration>> {
        self.topic_query(Query::Rfind, topic, owner)
    }

    /// `owner` records on exactly `topic`.
    pub fn same(&self, topic: &Topic, owner: OwnerType) -> Result<HashSet<Registration>> {
        self.topic_query(Query::Same, topic, owner)
    }

    /// `owner` records passing `filter`.
    pub fn filter(&self, filter: &RegistrationFilter, owner: OwnerType) -> Result<HashSet<Registration>> {
        let records = self.request(RequestKind::filter(owner), RequestData::Filter(filter.clone()))?;
        Ok(records.into_iter().collect())
    }

    /// Every `owner` record.
    pub fn all(&self, owner: OwnerType) -> Result<HashSet<Registration>> {
        let records = self.request(RequestKind::all(owner), RequestData::Empty)?;
        Ok(records.into_iter().collect())
    }

    /// Drop the link.
    pub fn close(&self) {
        self.socket.close();
    }
}
