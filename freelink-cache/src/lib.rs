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

//! # freelink-cache
//!
//! The freelink cache layer.
//!
//! freelink fronts a few of its read paths (who follows whom, a profile's skills, the list of
//! published category names) with a cache, & keeps one-time passwords *only* in the cache. The
//! contract is deliberately small: [Cache::get], [Cache::set] & [Cache::delete], on opaque byte
//! strings, with an optional time-to-live on `set`. There is no pattern-based invalidation; every
//! mutation in freelink computes the precise [Key]s it can stale & deletes those.
//!
//! Values are serialized with [MessagePack] via [get_value] & [set_value].
//!
//! [MessagePack]: https://msgpack.org
//!
//! The only implementation shipped today is [MemoryCache], a process-wide map. Anything that can
//! implement [Cache] (a remote key-value store, say) can be injected in its place.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use snafu::{Backtrace, IntoError, ResultExt, Snafu};

pub mod memory;
pub mod types;

pub use memory::MemoryCache;
pub use types::Key;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Cache backend failure: {source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to decode the value cached under {key}: {source}"))]
    Decode {
        key: Key,
        source: rmp_serde::decode::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to encode a value for {key}: {source}"))]
    Encode {
        key: Key,
        source: rmp_serde::encode::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Wrap an implementation-specific error
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        BackendSnafu.into_error(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           The Trait                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A shared, mutable, key-value store
///
/// Implementations must behave as a single associative store for all holders: a `set` by one task
/// is visible to a subsequent `get` from any other. There is no transactional isolation, either
/// between callers or between the cache & whatever store the cached values were derived from.
#[async_trait]
pub trait Cache {
    /// Retrieve the value stored under `key`; `None` if there is none or it has expired
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>>;
    /// Store `value` under `key`, replacing any prior value. `ttl` of `None` means the entry lives
    /// until it is explicitly deleted.
    async fn set(&self, key: &Key, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    /// Remove the entry for `key`; deleting an absent key is not an error
    async fn delete(&self, key: &Key) -> Result<()>;
}

// Generic methods would make `Cache` not object-safe, & I want to hold caches as `dyn Cache`; hence
// these are free functions.

/// Retrieve & deserialize the value stored under `key`
pub async fn get_value<V: DeserializeOwned>(
    cache: &(dyn Cache + Send + Sync),
    key: &Key,
) -> Result<Option<V>> {
    match cache.get(key).await? {
        Some(bytes) => rmp_serde::from_slice::<V>(&bytes)
            .context(DecodeSnafu { key: key.clone() })
            .map(Some),
        None => Ok(None),
    }
}

/// Serialize `value` & store it under `key`
pub async fn set_value<V: Serialize + ?Sized + Sync>(
    cache: &(dyn Cache + Send + Sync),
    key: &Key,
    value: &V,
    ttl: Option<Duration>,
) -> Result<()> {
    let bytes = rmp_serde::to_vec_named(value).context(EncodeSnafu { key: key.clone() })?;
    cache.set(key, bytes, ttl).await
}

#[cfg(test)]
mod test {
    use super::*;

    use serde::Deserialize;

    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    struct Summary {
        id: String,
        score: i64,
    }

    #[tokio::test]
    async fn typed_values() {
        let cache = MemoryCache::default();
        let key = Key::new("followers", &["a"]);
        assert!(
            get_value::<Vec<Summary>>(&cache, &key)
                .await
                .unwrap()
                .is_none()
        );
        let value = vec![
            Summary {
                id: "b".to_owned(),
                score: 11,
            },
            Summary {
                id: "c".to_owned(),
                score: 3,
            },
        ];
        set_value(&cache, &key, &value, None).await.unwrap();
        assert_eq!(
            get_value::<Vec<Summary>>(&cache, &key).await.unwrap(),
            Some(value)
        );
    }

    #[tokio::test]
    async fn undecodable_value() {
        let cache = MemoryCache::default();
        let key = Key::new("followers", &["a"]);
        cache.set(&key, vec![0xc1], None).await.unwrap();
        assert!(matches!(
            get_value::<Vec<Summary>>(&cache, &key).await,
            Err(Error::Decode { .. })
        ));
    }
}
