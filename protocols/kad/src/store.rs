// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Local record and provider stores.
//!
//! Both stores keep ordered secondary indexes on their deadlines so the
//! periodic sweep touches only the records that are actually due.

use bytes::Bytes;
use fnv::FnvHashMap;
use p2p_core::PeerId;
use std::collections::BTreeSet;
use std::time::Duration;

/// A locally stored value.
#[derive(Clone, Debug)]
pub struct ValueRecord {
    pub value: Bytes,
    /// When the record disappears.
    pub expire_at: Duration,
    /// When the record is next re-announced to the network.
    pub refresh_at: Duration,
    /// When the record was last written.
    pub updated_at: Duration,
}

/// Store for records this node holds.
pub(crate) struct LocalValueStore {
    max_record_age: Duration,
    refresh_interval: Duration,
    records: FnvHashMap<Bytes, ValueRecord>,
    by_expire: BTreeSet<(Duration, Bytes)>,
    by_refresh: BTreeSet<(Duration, Bytes)>,
}

impl LocalValueStore {
    pub(crate) fn new(max_record_age: Duration, refresh_interval: Duration) -> Self {
        LocalValueStore {
            max_record_age,
            refresh_interval,
            records: FnvHashMap::default(),
            by_expire: BTreeSet::new(),
            by_refresh: BTreeSet::new(),
        }
    }

    /// Inserts or refreshes a record. Returns true for a new key, which is
    /// the caller's cue for the initial announcement.
    pub(crate) fn put(&mut self, now: Duration, key: Bytes, value: Bytes) -> bool {
        match self.records.get_mut(&key) {
            Some(record) => {
                // Updated value: push the expiry out, keep the refresh
                // schedule as it is.
                self.by_expire.remove(&(record.expire_at, key.clone()));
                record.value = value;
                record.expire_at = now + self.max_record_age;
                record.updated_at = now;
                self.by_expire.insert((record.expire_at, key));
                false
            }
            None => {
                let record = ValueRecord {
                    value,
                    expire_at: now + self.max_record_age,
                    refresh_at: now + self.refresh_interval,
                    updated_at: now,
                };
                self.by_expire.insert((record.expire_at, key.clone()));
                self.by_refresh.insert((record.refresh_at, key.clone()));
                self.records.insert(key, record);
                true
            }
        }
    }

    pub(crate) fn get(&self, key: &Bytes) -> Option<&ValueRecord> {
        self.records.get(key)
    }

    pub(crate) fn contains(&self, key: &Bytes) -> bool {
        self.records.contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Drops expired records and returns the keys due for re-announcement,
    /// pushing their next refresh out by one interval.
    pub(crate) fn sweep(&mut self, now: Duration) -> Vec<Bytes> {
        loop {
            let head = match self.by_expire.iter().next() {
                Some((at, key)) if *at <= now => (*at, key.clone()),
                _ => break,
            };
            self.by_expire.remove(&head);
            let (_, key) = head;
            if let Some(record) = self.records.remove(&key) {
                self.by_refresh.remove(&(record.refresh_at, key));
            }
        }

        let mut due = Vec::new();
        loop {
            let head = match self.by_refresh.iter().next() {
                Some((at, key)) if *at <= now => (*at, key.clone()),
                _ => break,
            };
            self.by_refresh.remove(&head);
            let (at, key) = head;
            if let Some(record) = self.records.get_mut(&key) {
                record.refresh_at = at + self.refresh_interval;
                self.by_refresh.insert((record.refresh_at, key.clone()));
                due.push(key);
            }
        }
        due
    }
}

/// Store for provider advertisements this node has learned.
pub(crate) struct ProviderStore {
    ttl: Duration,
    providers: FnvHashMap<Bytes, FnvHashMap<PeerId, Duration>>,
}

impl ProviderStore {
    pub(crate) fn new(ttl: Duration) -> Self {
        ProviderStore {
            ttl,
            providers: FnvHashMap::default(),
        }
    }

    pub(crate) fn add(&mut self, now: Duration, key: Bytes, provider: PeerId) {
        self.providers
            .entry(key)
            .or_default()
            .insert(provider, now + self.ttl);
    }

    pub(crate) fn providers_of(&self, key: &Bytes, now: Duration) -> Vec<PeerId> {
        self.providers
            .get(key)
            .map(|peers| {
                peers
                    .iter()
                    .filter(|(_, expire)| **expire > now)
                    .map(|(peer, _)| *peer)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn sweep(&mut self, now: Duration) {
        self.providers.retain(|_, peers| {
            peers.retain(|_, expire| *expire > now);
            !peers.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn store() -> LocalValueStore {
        // 100 minute lifetime, refresh after 40.
        LocalValueStore::new(MINUTE * 100, MINUTE * 40)
    }

    #[test]
    fn new_records_want_an_initial_announcement() {
        let mut store = store();
        let key = Bytes::from_static(b"k");
        assert!(store.put(MINUTE, key.clone(), Bytes::from_static(b"v1")));
        assert!(!store.put(MINUTE * 2, key.clone(), Bytes::from_static(b"v2")));
        assert_eq!(store.get(&key).unwrap().value, Bytes::from_static(b"v2"));
    }

    #[test]
    fn refresh_is_due_at_two_fifths_of_the_lifetime() {
        let mut store = store();
        let key = Bytes::from_static(b"k");
        store.put(Duration::from_secs(0), key.clone(), Bytes::from_static(b"v"));

        assert!(store.sweep(MINUTE * 39).is_empty());
        assert_eq!(store.sweep(MINUTE * 40), vec![key.clone()]);
        // The next refresh moved one interval out.
        assert!(store.sweep(MINUTE * 41).is_empty());
        assert_eq!(store.sweep(MINUTE * 80), vec![key]);
    }

    #[test]
    fn expired_records_disappear() {
        let mut store = store();
        let key = Bytes::from_static(b"k");
        store.put(Duration::from_secs(0), key.clone(), Bytes::from_static(b"v"));
        store.sweep(MINUTE * 100);
        assert!(!store.contains(&key));
        assert_eq!(store.len(), 0);
        // And they are no longer refreshed either.
        assert!(store.sweep(MINUTE * 500).is_empty());
    }

    #[test]
    fn providers_expire_per_entry() {
        let mut providers = ProviderStore::new(MINUTE * 10);
        let key = Bytes::from_static(b"k");
        let a = PeerId::random();
        let b = PeerId::random();
        providers.add(Duration::from_secs(0), key.clone(), a);
        providers.add(MINUTE * 5, key.clone(), b);

        let now = MINUTE * 12;
        let alive = providers.providers_of(&key, now);
        assert_eq!(alive, vec![b]);
        providers.sweep(now);
        assert_eq!(providers.providers_of(&key, MINUTE * 20), Vec::<PeerId>::new());
    }
}
