// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of freelink.
//
// freelink is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// freelink is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with freelink.  If not,
// see <http://www.gnu.org/licenses/>.

//! # An in-process [Cache] implementation
//!
//! [MemoryCache] is a map from [Key] to bytes behind a [tokio::sync::RwLock]. It is cheaply
//! clonable (clones share the same map), so one instance created at process start serves every
//! task in the process.
//!
//! Entries set with a time-to-live carry an expiration [Instant]. An expired entry is never
//! returned by [Cache::get], but it stays in the map until the next cleaning pass. Cleaning is
//! opportunistic: each `set` checks whether `clean_frequency` has elapsed since the last pass & if
//! so sweeps the map, retaining only live entries.
//!
//! The clock is [tokio::time::Instant], so tests can pause & advance time.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, trace};

use crate::{Cache, Key, Result};

/// How often to sweep expired entries, absent other instructions
pub const DEFAULT_CLEAN_FREQUENCY: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
struct Entry {
    value: Vec<u8>,
    expiration: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expiration.is_none_or(|exp| exp > now)
    }
}

/// A process-wide, in-memory cache
#[derive(Clone, Debug)]
pub struct MemoryCache {
    map: Arc<RwLock<HashMap<Key, Entry>>>,
    last_clean: Arc<RwLock<Instant>>,
    clean_frequency: Duration,
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::new(DEFAULT_CLEAN_FREQUENCY)
    }
}

impl MemoryCache {
    pub fn new(clean_frequency: Duration) -> MemoryCache {
        MemoryCache {
            map: Arc::new(RwLock::new(HashMap::new())),
            last_clean: Arc::new(RwLock::new(Instant::now())),
            clean_frequency,
        }
    }
    /// Number of entries currently held, *including* any that have expired but not been swept
    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }
    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }
    /// Drop all expired entries, regardless of when we last cleaned
    pub async fn clean(&self) {
        let mut last_clean = self.last_clean.write().await;
        let now = Instant::now();
        let mut map = self.map.write().await;
        let before = map.len();
        map.retain(|_, entry| entry.live(now));
        debug!("Removed {} expired entries from the cache", before - map.len());
        *last_clean = now;
    }
    async fn maybe_clean(&self) {
        let due = {
            // release the read lock before `clean()` takes the write lock
            *self.last_clean.read().await + self.clean_frequency <= Instant::now()
        };
        if due {
            self.clean().await;
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let value = self
            .map
            .read()
            .await
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value.clone());
        trace!("MemoryCache::get({key}): {}", if value.is_some() { "hit" } else { "miss" });
        Ok(value)
    }
    async fn set(&self, key: &Key, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.maybe_clean().await;
        let expiration = ttl.map(|ttl| Instant::now() + ttl);
        trace!("MemoryCache::set({key}, ttl: {ttl:?})");
        self.map
            .write()
            .await
            .insert(key.clone(), Entry { value, expiration });
        Ok(())
    }
    async fn delete(&self, key: &Key) -> Result<()> {
        trace!("MemoryCache::delete({key})");
        self.map.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::default();
        let k = Key::new("followers", &["a"]);
        assert_eq!(cache.get(&k).await.unwrap(), None);
        cache.set(&k, vec![1, 2, 3], None).await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap(), Some(vec![1, 2, 3]));
        cache.set(&k, vec![4], None).await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap(), Some(vec![4]));
        cache.delete(&k).await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap(), None);
        // Deleting an absent key is fine
        cache.delete(&k).await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_state() {
        let cache = MemoryCache::default();
        let other = cache.clone();
        let k = Key::new("followings", &["b"]);
        cache.set(&k, vec![7], None).await.unwrap();
        assert_eq!(other.get(&k).await.unwrap(), Some(vec![7]));
        other.delete(&k).await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry() {
        let cache = MemoryCache::new(Duration::from_secs(3600));
        let otp = Key::new("otp", &["09131111111", "123456"]);
        let rel = Key::new("followers", &["a"]);
        cache
            .set(&otp, vec![1], Some(Duration::from_secs(120)))
            .await
            .unwrap();
        cache.set(&rel, vec![2], None).await.unwrap();

        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(cache.get(&otp).await.unwrap(), Some(vec![1]));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&otp).await.unwrap(), None);
        assert_eq!(cache.get(&rel).await.unwrap(), Some(vec![2]));
        // Expired, but not yet swept
        assert_eq!(cache.len().await, 2);
        cache.clean().await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_clean() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let k0 = Key::new("otp", &["09131111111", "000001"]);
        cache
            .set(&k0, vec![0], Some(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        // This `set` should trigger a sweep that drops `k0`
        let k1 = Key::new("otp", &["09131111111", "000002"]);
        cache
            .set(&k1, vec![1], Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&k1).await.unwrap(), Some(vec![1]));
    }
}
