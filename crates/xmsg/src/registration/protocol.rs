// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Registrar request/reply protocol.
//!
//! ```text
//! request: [request topic, sender, payload]
//! reply:   [request topic, sender, status, record JSON...]
//! ```
//!
//! The payload is a JSON [`Registration`] for register, remove and the
//! topic queries, the bare host string for remove-all, a JSON
//! [`RegistrationFilter`] for filter, and empty for all. The status is
//! [`SUCCESS`] or a human-readable error.

use super::database::RegistrationFilter;
use super::record::{OwnerType, Registration};
use crate::config::SUCCESS;
use crate::error::{Error, Result};
use std::fmt;

/// Operation selected by the request topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Add a publisher record.
    RegisterPublisher,
    /// Add a subscriber record.
    RegisterSubscriber,
    /// Remove a publisher record.
    RemovePublisher,
    /// Remove a subscriber record.
    RemoveSubscriber,
    /// Remove every record on a host.
    RemoveAll,
    /// Publishers on parent topics.
    FindPublisher,
    /// Subscribers on parent topics.
    FindSubscriber,
    /// Publishers on child topics.
    RfindPublisher,
    /// Subscribers on child topics.
    RfindSubscriber,
    /// Publishers passing a filter.
    FilterPublisher,
    /// Subscribers passing a filter.
    FilterSubscriber,
    /// Publishers on the exact topic.
    SamePublisher,
    /// Subscribers on the exact topic.
    SameSubscriber,
    /// Every publisher.
    AllPublisher,
    /// Every subscriber.
    AllSubscriber,
}

const KINDS: [(RequestKind, &str); 15] = [
    (RequestKind::RegisterPublisher, "registerPublisher"),
    (RequestKind::RegisterSubscriber, "registerSubscriber"),
    (RequestKind::RemovePublisher, "removePublisherRegistration"),
    (RequestKind::RemoveSubscriber, "removeSubscriberRegistration"),
    (RequestKind::RemoveAll, "removeAllRegistration"),
    (RequestKind::FindPublisher, "findPublisher"),
    (RequestKind::FindSubscriber, "findSubscriber"),
    (RequestKind::RfindPublisher, "rfindPublisher"),
    (RequestKind::RfindSubscriber, "rfindSubscriber"),
    (RequestKind::FilterPublisher, "filterPublisher"),
    (RequestKind::FilterSubscriber, "filterSubscriber"),
    (RequestKind::SamePublisher, "samePublisher"),
    (RequestKind::SameSubscriber, "sameSubscriber"),
    (RequestKind::AllPublisher, "allPublisher"),
    (RequestKind::AllSubscriber, "allSubscriber"),
];

/// Query relation used by the topic-based lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Parent-or-equal topics.
    Find,
    /// Child-or-equal topics.
    Rfind,
    /// Exact topic.
    Same,
}

impl RequestKind {
    /// Request topic string.
    pub fn as_str(self) -> &'static str {
        KINDS
            .iter()
            .find(|(k, _)| *k == self)
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    /// Parse a request topic.
    pub fn parse(topic: &str) -> Option<Self> {
        KINDS.iter().find(|(_, s)| *s == topic).map(|(k, _)| *k)
    }

    /// Register request for `owner`.
    pub fn register(owner: OwnerType) -> Self {
        match owner {
            OwnerType::Publisher => Self::RegisterPublisher,
            OwnerType::Subscriber => Self::RegisterSubscriber,
        }
    }

    /// Remove request for `owner`.
    pub fn remove(owner: OwnerType) -> Self {
        match owner {
            OwnerType::Publisher => Self::RemovePublisher,
            OwnerType::Subscriber => Self::RemoveSubscriber,
        }
    }

    /// Topic query for `owner`.
    pub fn query(query: Query, owner: OwnerType) -> Self {
        use OwnerType::{Publisher, Subscriber};
        match (query, owner) {
            (Query::Find, Publisher) => Self::FindPublisher,
            (Query::Find, Subscriber) => Self::FindSubscriber,
            (Query::Rfind, Publisher) => Self::RfindPublisher,
            (Query::Rfind, Subscriber) => Self::RfindSubscriber,
            (Query::Same, Publisher) => Self::SamePublisher,
            (Query::Same, Subscriber) => Self::SameSubscriber,
        }
    }

    /// Filter query for `owner`.
    pub fn filter(owner: OwnerType) -> Self {
        match owner {
            OwnerType::Publisher => Self::FilterPublisher,
            OwnerType::Subscriber => Self::FilterSubscriber,
        }
    }

    /// All-records query for `owner`.
    pub fn all(owner: OwnerType) -> Self {
        match owner {
            OwnerType::Publisher => Self::AllPublisher,
            OwnerType::Subscriber => Self::AllSubscriber,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded request payload.
#[derive(Debug, Clone)]
pub enum RequestData {
    /// A record (register, remove, topic queries).
    Record(Registration),
    /// A host name (remove-all).
    Host(String),
    /// A filter (filter queries).
    Filter(RegistrationFilter),
    /// Nothing (all queries).
    Empty,
}

/// Encode a request.
pub fn encode_request(kind: RequestKind, sender: &str, data: &RequestData) -> Result<Vec<Vec<u8>>> {
    let payload = match data {
        RequestData::Record(r) => serde_json::to_vec(r).map_err(json_error)?,
        RequestData::Host(h) => h.as_bytes().to_vec(),
        RequestData::Filter(f) => serde_json::to_vec(f).map_err(json_error)?,
        RequestData::Empty => Vec::new(),
    };
    Ok(vec![
        kind.as_str().as_bytes().to_vec(),
        sender.as_bytes().to_vec(),
        payload,
    ])
}

/// Decode a request into its kind, sender and payload.
///
/// An unknown request topic is reported as `Err` carrying the status string
/// to send back.
pub fn decode_request(frames: &[Vec<u8>]) -> std::result::Result<(RequestKind, String, RequestData), String> {
    if frames.len() != 3 {
        return Err(format!("malformed request: {} frames", frames.len()));
    }
    let topic = String::from_utf8_lossy(&frames[0]);
    let kind = RequestKind::parse(&topic).ok_or_else(|| format!("unknown request: {}", topic))?;
    let sender = String::from_utf8_lossy(&frames[1]).into_owned();
    let payload = &frames[2];

    let data = match kind {
        RequestKind::RemoveAll => RequestData::Host(String::from_utf8_lossy(payload).into_owned()),
        RequestKind::FilterPublisher | RequestKind::FilterSubscriber => RequestData::Filter(
            serde_json::from_slice(payload).map_err(|e| format!("bad filter: {}", e))?,
        ),
        RequestKind::AllPublisher | RequestKind::AllSubscriber => RequestData::Empty,
        _ => RequestData::Record(
            serde_json::from_slice(payload).map_err(|e| format!("bad registration: {}", e))?,
        ),
    };
    Ok((kind, sender, data))
}

/// Encode a reply.
pub fn encode_reply<'a>(
    topic: &[u8],
    sender: &[u8],
    status: &str,
    records: impl IntoIterator<Item = &'a Registration>,
) -> Vec<Vec<u8>> {
    let mut frames = vec![topic.to_vec(), sender.to_vec(), status.as_bytes().to_vec()];
    for record in records {
        match serde_json::to_vec(record) {
            Ok(json) => frames.push(json),
            Err(e) => log::warn!("[registrar] cannot encode record {}: {}", record.name, e),
        }
    }
    frames
}

/// Decode a reply to `kind`, turning a non-success status into
/// [`Error::Registrar`].
pub fn decode_reply(kind: RequestKind, frames: &[Vec<u8>]) -> Result<Vec<Registration>> {
    if frames.len() < 3 {
        return Err(Error::Protocol(format!(
            "registrar reply has {} frames",
            frames.len()
        )));
    }
    if frames[0] != kind.as_str().as_bytes() {
        return Err(Error::Protocol(format!(
            "reply to {:?} answers {:?}",
            kind.as_str(),
            String::from_utf8_lossy(&frames[0])
        )));
    }
    let status = String::from_utf8_lossy(&frames[2]);
    if status != SUCCESS {
        return Err(Error::Registrar(status.into_owned()));
    }
    frames[3..]
        .iter()
        .map(|f| serde_json::from_slice(f).map_err(json_error))
        .collect()
}

fn json_error(e: serde_json::Error) -> Error {
    Error::Protocol(format!("registration JSON: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_unique() {
        for (kind, name) in KINDS {
            assert_eq!(RequestKind::parse(name), Some(kind));
            assert_eq!(kind.as_str(), name);
        }
        assert_eq!(RequestKind::parse("dropTables"), None);
    }

    #[test]
    fn test_decode_unknown_request() {
        let frames = vec![b"dropTables".to_vec(), b"me".to_vec(), Vec::new()];
        let err = decode_request(&frames).unwrap_err();
        assert!(err.contains("unknown request"));
    }

    #[test]
    fn test_remove_all_carries_bare_host() {
        let frames =
            encode_request(RequestKind::RemoveAll, "me", &RequestData::Host("node1".into())).unwrap();
        assert_eq!(frames[2], b"node1");
        let (kind, sender, data) = decode_request(&frames).unwrap();
        assert_eq!(kind, RequestKind::RemoveAll);
        assert_eq!(sender, "me");
        assert!(matches!(data, RequestData::Host(h) if h == "node1"));
    }

    #[test]
    fn test_error_status_surfaces_literally() {
        let reply = encode_reply(b"findPublisher", b"me", "topic is malformed", []);
        let err = decode_reply(RequestKind::FindPublisher, &reply).unwrap_err();
        assert!(matches!(err, Error::Registrar(s) if s == "topic is malformed"));
    }

    #[test]
    fn test_reply_topic_must_match() {
        let reply = encode_reply(b"findSubscriber", b"me", SUCCESS, []);
        assert!(matches!(
            decode_reply(RequestKind::FindPublisher, &reply),
            Err(Error::Protocol(_))
        ));
    }
}
