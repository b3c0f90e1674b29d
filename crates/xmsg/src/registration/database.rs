// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! In-memory registration database.
//!
//! Maps each topic to the set of actors registered under it. A registrar
//! keeps one database for publishers and one for subscribers.
//!
//! # Match semantics
//!
//! | Query | Returns buckets whose topic is |
//! |---|---|
//! | [`find`](RegistrationDatabase::find) | a parent of (or equal to) the query |
//! | [`rfind`](RegistrationDatabase::rfind) | a child of (or equal to) the query |
//! | [`same`](RegistrationDatabase::same) | exactly the query |
//! | [`filter`](RegistrationDatabase::filter) | any; records filtered field by field |
//!
//! # Concurrency
//!
//! The map is a [`DashMap`]: mutation is atomic per key and queries may run
//! while other threads register or remove. Queries return owned snapshots.
//! A bucket is removed in the same locked step that empties it.

use super::record::Registration;
use crate::config::ANY;
use crate::error::Result;
use crate::topic::Topic;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Field-by-field record filter. `None` (or the wildcard) matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationFilter {
    /// Exact domain.
    #[serde(default)]
    pub domain: Option<String>,
    /// Exact subject.
    #[serde(default)]
    pub subject: Option<String>,
    /// Exact type.
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    /// Exact host.
    #[serde(default)]
    pub host: Option<String>,
    /// Exact port.
    #[serde(default)]
    pub port: Option<u16>,
}

impl RegistrationFilter {
    /// Filter on topic components; wildcards match anything.
    pub fn topic(domain: &str, subject: &str, type_: &str) -> Self {
        let exact = |s: &str| (s != ANY && !s.is_empty()).then(|| s.to_string());
        Self {
            domain: exact(domain),
            subject: exact(subject),
            type_: exact(type_),
            ..Self::default()
        }
    }

    /// Narrow to actors on `host:port`.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// True when `record` passes every set criterion.
    pub fn matches(&self, record: &Registration) -> bool {
        fn field(want: &Option<String>, have: &str) -> bool {
            match want.as_deref() {
                None | Some(ANY) => true,
                Some(w) => w == have,
            }
        }
        field(&self.domain, &record.domain)
            && field(&self.subject, &record.subject)
            && field(&self.type_, &record.type_)
            && field(&self.host, &record.host)
            && self.port.map_or(true, |p| p == record.port)
    }
}

/// Topic-indexed set of registrations.
#[derive(Debug, Default)]
pub struct RegistrationDatabase {
    db: DashMap<Topic, HashSet<Registration>>,
}

impl RegistrationDatabase {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `record` to its topic bucket.
    ///
    /// Returns false when an equal record (same name and host) is already
    /// there; the stored record is left unchanged.
    pub fn register(&self, record: Registration) -> Result<bool> {
        let topic = record.topic()?;
        Ok(self.db.entry(topic).or_default().insert(record))
    }

    /// Remove the record matching `record`'s name and host from its topic
    /// bucket. Returns whether something was removed.
    pub fn remove(&self, record: &Registration) -> Result<bool> {
        let topic = record.topic()?;
        let mut removed = false;
        self.db.remove_if_mut(&topic, |_, bucket| {
            removed = bucket.remove(record);
            bucket.is_empty()
        });
        Ok(removed)
    }

    /// Remove every record on `host`. Returns how many were removed.
    pub fn remove_host(&self, host: &str) -> usize {
        let mut removed = 0;
        self.db.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|r| r.host != host);
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        removed
    }

    fn collect(&self, mut keep: impl FnMut(&Topic) -> bool) -> HashSet<Registration> {
        let mut result = HashSet::new();
        for entry in self.db.iter() {
            if keep(entry.key()) {
                result.extend(entry.value().iter().cloned());
            }
        }
        result
    }

    /// Records whose topic is a parent of, or equal to, `topic`.
    ///
    /// These are the registrations that would receive a message published
    /// on `topic`.
    pub fn find(&self, topic: &Topic) -> HashSet<Registration> {
        self.collect(|key| key.is_parent(topic))
    }

    /// Records whose topic is a child of, or equal to, `topic`.
    pub fn rfind(&self, topic: &Topic) -> HashSet<Registration> {
        self.collect(|key| topic.is_parent(key))
    }

    /// Records registered under exactly `topic`.
    pub fn same(&self, topic: &Topic) -> HashSet<Registration> {
        self.get(topic)
    }

    /// Records passing `filter`, regardless of topic hierarchy.
    pub fn filter(&self, filter: &RegistrationFilter) -> HashSet<Registration> {
        let mut result = HashSet::new();
        for entry in self.db.iter() {
            result.extend(entry.value().iter().filter(|r| filter.matches(r)).cloned());
        }
        result
    }

    /// Every record.
    pub fn all(&self) -> HashSet<Registration> {
        self.collect(|_| true)
    }

    /// Topics with at least one record.
    pub fn topics(&self) -> HashSet<Topic> {
        self.db.iter().map(|e| e.key().clone()).collect()
    }

    /// Records filed under `topic` (empty when none).
    pub fn get(&self, topic: &Topic) -> HashSet<Registration> {
        self.db
            .get(topic)
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.db.iter().map(|e| e.value().len()).sum()
    }

    /// True when no record is stored.
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ProxyAddress;
    use crate::registration::OwnerType;
    use std::sync::Arc;
    use std::thread;

    fn topic(s: &str) -> Topic {
        let mut parts = s.splitn(3, ':');
        Topic::build_with_type(
            parts.next().unwrap(),
            parts.next().unwrap_or(ANY),
            parts.next().unwrap_or(ANY),
        )
        .unwrap()
    }

    fn record(name: &str, host: &str, t: &str) -> Registration {
        Registration::new(
            name,
            "test actor",
            &topic(t),
            &ProxyAddress::new(host, 7771),
            OwnerType::Subscriber,
        )
    }

    fn names(set: &HashSet<Registration>) -> Vec<String> {
        let mut v: Vec<_> = set.iter().map(|r| r.name.clone()).collect();
        v.sort();
        v
    }

    #[test]
    fn test_get_returns_registered_set() {
        let db = RegistrationDatabase::new();
        for i in 0..5 {
            assert!(db.register(record(&format!("a{}", i), "h", "d:s:t")).unwrap());
        }
        assert_eq!(db.get(&topic("d:s:t")).len(), 5);

        assert!(db.remove(&record("a0", "h", "d:s:t")).unwrap());
        assert_eq!(db.get(&topic("d:s:t")).len(), 4);

        for i in 1..5 {
            db.remove(&record(&format!("a{}", i), "h", "d:s:t")).unwrap();
        }
        assert!(db.topics().is_empty());
        assert!(db.is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let db = RegistrationDatabase::new();
        assert!(db.register(record("a", "h", "d")).unwrap());
        assert!(!db.register(record("a", "h", "d")).unwrap());
        assert_eq!(db.get(&topic("d")).len(), 1);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let db = RegistrationDatabase::new();
        db.register(record("a", "h", "d")).unwrap();
        assert!(!db.remove(&record("b", "h", "d")).unwrap());
        assert!(!db.remove(&record("a", "h", "other")).unwrap());
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_remove_host_purges_everywhere() {
        let db = RegistrationDatabase::new();
        db.register(record("a", "h1", "d")).unwrap();
        db.register(record("b", "h1", "d:s")).unwrap();
        db.register(record("c", "h2", "d:s")).unwrap();

        assert_eq!(db.remove_host("h1"), 2);
        assert!(db.all().iter().all(|r| r.host != "h1"));
        assert_eq!(db.topics(), [topic("d:s")].into_iter().collect());
    }

    #[test]
    fn test_find_returns_parents() {
        let db = RegistrationDatabase::new();
        db.register(record("top", "h", "A")).unwrap();
        db.register(record("mid", "h", "A:B")).unwrap();
        db.register(record("leaf", "h", "A:B:C")).unwrap();
        db.register(record("other", "h", "Z")).unwrap();

        assert_eq!(names(&db.find(&topic("A:B:C"))), ["leaf", "mid", "top"]);
        assert_eq!(names(&db.find(&topic("A"))), ["top"]);
    }

    #[test]
    fn test_rfind_returns_children() {
        let db = RegistrationDatabase::new();
        db.register(record("top", "h", "A")).unwrap();
        db.register(record("mid", "h", "A:B")).unwrap();
        db.register(record("leaf", "h", "A:B:C")).unwrap();

        assert_eq!(names(&db.rfind(&topic("A"))), ["leaf", "mid", "top"]);
        assert_eq!(names(&db.rfind(&topic("A:B:C"))), ["leaf"]);
    }

    #[test]
    fn test_same_is_exact() {
        let db = RegistrationDatabase::new();
        db.register(record("sub", "h", "x:y:z")).unwrap();
        assert_eq!(db.same(&topic("x:y:z")).len(), 1);
        assert!(db.same(&topic("x:y")).is_empty());
        assert!(db.same(&Topic::build_with_type("x", "y", "z:extra").unwrap()).is_empty());
    }

    #[test]
    fn test_filter_by_fields_and_address() {
        let db = RegistrationDatabase::new();
        db.register(record("a", "h1", "d:s:t")).unwrap();
        db.register(record("b", "h2", "d:s:u")).unwrap();
        db.register(record("c", "h1", "e:s:t")).unwrap();

        let by_subject = RegistrationFilter::topic(ANY, "s", ANY);
        assert_eq!(db.filter(&by_subject).len(), 3);

        let by_type = RegistrationFilter::topic("d", ANY, "t");
        assert_eq!(names(&db.filter(&by_type)), ["a"]);

        let by_host = RegistrationFilter::topic(ANY, ANY, ANY).with_address("h1", 7771);
        assert_eq!(names(&db.filter(&by_host)), ["a", "c"]);

        let wrong_port = RegistrationFilter::topic(ANY, ANY, ANY).with_address("h1", 1);
        assert!(db.filter(&wrong_port).is_empty());
    }

    #[test]
    fn test_concurrent_register_and_query() {
        let db = Arc::new(RegistrationDatabase::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for i in 0..200 {
                        let r = record(&format!("w{}-{}", w, i), "h", "d:s");
                        db.register(r.clone()).unwrap();
                        if i % 2 == 0 {
                            db.remove(&r).unwrap();
                        }
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            let _ = db.find(&topic("d:s:t"));
            let _ = db.topics();
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(db.len(), 400);
    }
}
