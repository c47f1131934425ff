// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Single-use registry for signatures over timestamped messages.
//!
//! An entry lives until the signed timestamp itself leaves the freshness
//! window (`signed_at + freshness`), not merely `freshness` after it was first
//! seen. A message dated in the future therefore stays blocked for as long as
//! the freshness check would still accept it.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::infrastructure::crypto::signature;

#[derive(Debug, Default)]
pub struct ReplayCache {
    /// Signature fingerprint -> instant the signed message goes stale.
    entries: DashMap<String, DateTime<Utc>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, signature: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(&signature::fingerprint(signature))
            .is_some_and(|stale_at| *stale_at > now)
    }

    /// Atomically record `signature` as used until `stale_at`. Returns `false`
    /// if a live entry already exists.
    pub fn claim(&self, signature: &str, stale_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.entries.entry(signature::fingerprint(signature)) {
            Entry::Occupied(mut existing) => {
                if *existing.get() > now {
                    false
                } else {
                    existing.insert(stale_at);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(stale_at);
                true
            }
        }
    }

    /// Drop entries whose message can no longer pass a freshness check.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, stale_at| *stale_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
