// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! # xMsg Topic
//!
//! A [`Topic`] is an immutable hierarchical identifier rendered as
//! `domain[:subject[:type]]`. Wildcard components are omitted from the
//! rendering, so `build("a", "*", "c")` is simply `"a"`.
//!
//! ## Hierarchy
//!
//! A topic is a *parent* of another when its string is a prefix of the
//! other's string. A subscription on a parent topic receives messages
//! published on every child topic:
//!
//! ```
//! use xmsg::Topic;
//!
//! let parent = Topic::build("detector")?;
//! let child = Topic::build_with_type("detector", "tracks", "raw")?;
//! assert!(parent.is_parent(&child));
//! assert!(child.is_parent(&child));
//! assert!(!child.is_parent(&parent));
//! # Ok::<(), xmsg::Error>(())
//! ```
//!
//! Matching is case-sensitive; no normalization happens after construction.

use crate::config::{ANY, TOPIC_SEPARATOR};
use crate::error::{Error, Result};
use std::fmt;

/// Hierarchical `domain[:subject[:type]]` identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    topic: String,
}

impl Topic {
    /// Build a topic covering every subject of `domain`.
    pub fn build(domain: &str) -> Result<Self> {
        Self::build_with_type(domain, ANY, ANY)
    }

    /// Build a `domain:subject` topic.
    pub fn build_with_subject(domain: &str, subject: &str) -> Result<Self> {
        Self::build_with_type(domain, subject, ANY)
    }

    /// Build a `domain:subject:type` topic.
    ///
    /// A wildcard subject forces the type to wildcard as well. The type
    /// component is the remainder of the topic and may itself contain
    /// separators.
    pub fn build_with_type(domain: &str, subject: &str, type_: &str) -> Result<Self> {
        if domain.is_empty() || domain == ANY {
            return Err(Error::MalformedTopic(format!(
                "domain must be a concrete value, got {:?}",
                domain
            )));
        }
        if domain.contains(TOPIC_SEPARATOR) {
            return Err(Error::MalformedTopic(format!(
                "domain {:?} contains the separator",
                domain
            )));
        }

        let mut topic = String::from(domain);
        if subject.is_empty() || subject == ANY {
            return Ok(Self { topic });
        }
        if subject.contains(TOPIC_SEPARATOR) {
            return Err(Error::MalformedTopic(format!(
                "subject {:?} contains the separator",
                subject
            )));
        }
        topic.push(TOPIC_SEPARATOR);
        topic.push_str(subject);

        if !type_.is_empty() && type_ != ANY {
            topic.push(TOPIC_SEPARATOR);
            topic.push_str(type_);
        }
        Ok(Self { topic })
    }

    /// Wrap an already-formed topic string without validation.
    ///
    /// Used when re-emitting a topic received from the wire; the caller is
    /// responsible for its shape.
    pub fn wrap(raw: impl Into<String>) -> Self {
        Self { topic: raw.into() }
    }

    /// Domain component.
    pub fn domain(&self) -> &str {
        self.components().0
    }

    /// Subject component, or the wildcard marker when absent.
    pub fn subject(&self) -> &str {
        self.components().1
    }

    /// Type component, or the wildcard marker when absent.
    pub fn type_(&self) -> &str {
        self.components().2
    }

    /// True when `self` is `other` or one of its ancestors.
    pub fn is_parent(&self, other: &Topic) -> bool {
        other.topic.starts_with(&self.topic)
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.topic
    }

    fn components(&self) -> (&str, &str, &str) {
        let mut parts = self.topic.splitn(3, TOPIC_SEPARATOR);
        let domain = parts.next().unwrap_or_default();
        let subject = parts.next().unwrap_or(ANY);
        let type_ = parts.next().unwrap_or(ANY);
        (domain, subject, type_)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.topic)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_domain_only() {
        let topic = Topic::build("rock").unwrap();
        assert_eq!(topic.as_str(), "rock");
        assert_eq!(topic.domain(), "rock");
        assert_eq!(topic.subject(), ANY);
        assert_eq!(topic.type_(), ANY);
    }

    #[test]
    fn test_build_full() {
        let topic = Topic::build_with_type("rock", "metal", "doom").unwrap();
        assert_eq!(topic.as_str(), "rock:metal:doom");
        assert_eq!(topic.domain(), "rock");
        assert_eq!(topic.subject(), "metal");
        assert_eq!(topic.type_(), "doom");
    }

    #[test]
    fn test_wildcard_subject_forces_wildcard_type() {
        let topic = Topic::build_with_type("rock", ANY, "doom").unwrap();
        assert_eq!(topic.as_str(), "rock");
        assert_eq!(topic.type_(), ANY);
    }

    #[test]
    fn test_wildcard_type_is_dropped() {
        let topic = Topic::build_with_type("rock", "metal", ANY).unwrap();
        assert_eq!(topic.as_str(), "rock:metal");
    }

    #[test]
    fn test_reject_wildcard_domain() {
        assert!(matches!(
            Topic::build(ANY),
            Err(Error::MalformedTopic(_))
        ));
        assert!(Topic::build("").is_err());
    }

    #[test]
    fn test_reject_separator_in_domain_and_subject() {
        assert!(Topic::build("a:b").is_err());
        assert!(Topic::build_with_subject("a", "b:c").is_err());
    }

    #[test]
    fn test_type_may_hold_separator() {
        let topic = Topic::build_with_type("x", "y", "z:extra").unwrap();
        assert_eq!(topic.as_str(), "x:y:z:extra");
        assert_eq!(topic.type_(), "z:extra");
    }

    #[test]
    fn test_is_parent_hierarchy() {
        let d = Topic::build("d").unwrap();
        let ds = Topic::build_with_subject("d", "s").unwrap();
        let dst = Topic::build_with_type("d", "s", "t").unwrap();

        assert!(d.is_parent(&ds));
        assert!(ds.is_parent(&dst));
        assert!(d.is_parent(&dst));
        assert!(dst.is_parent(&dst));
        assert!(!dst.is_parent(&ds));
        assert!(!ds.is_parent(&d));
    }

    #[test]
    fn test_is_parent_different_domains() {
        let a = Topic::build("A").unwrap();
        let b = Topic::build_with_type("B", "s", "t").unwrap();
        assert!(!a.is_parent(&b));
        assert!(!b.is_parent(&a));
    }

    #[test]
    fn test_case_sensitive() {
        let lower = Topic::build("rock").unwrap();
        let upper = Topic::build("Rock").unwrap();
        assert!(!lower.is_parent(&upper));
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_wrap_is_unchecked() {
        let topic = Topic::wrap("*:whatever");
        assert_eq!(topic.domain(), "*");
        assert_eq!(topic.subject(), "whatever");
    }
}
