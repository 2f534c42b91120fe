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

//! # The freelink Integration Tests
//!
//! # Introduction
//!
//! The Rust unit & integration testing framework is oriented toward testing *libraries*; there's
//! no notion of test fixtures, nor even of simple setup & teardown operations that apply to
//! multiple tests. Following T.J. Telan's [approach], the integration tests in this crate opt-out
//! of the default test harness:
//!
//! ```toml
//! [[test]]
//!     name = "sqlite"
//!     harness = false
//! ```
//!
//! [approach]: https://tjtelan.com/blog/rust-custom-test-harness/
//!
//! and use [libtest-mimic] to present a conventional `cargo test` interface.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! # Project Structure
//!
//! The test suites live here, in the library, as async functions returning `Result<(), Failed>`.
//! Each takes the storage backend it is to exercise; it is up to the integration test programs in
//! `tests` to construct a fresh backend for each test. Code relating to the test framework itself
//! (the `Test` struct, configuration) belongs in `tests/common`.
//!
//! The same suites run against every backend, which is the point: the in-memory & SQLite stores
//! must be indistinguishable to the services sitting atop them.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use libtest_mimic::Failed;
use secrecy::SecretString;
use tokio::sync::Notify;

use freelink::{
    entities::{PhoneNumber, Profile, User},
    freelink::{DEFAULT_OTP_TTL, Freelink},
    otp::MemorySender,
    storage::Backend as StorageBackend,
    users,
};
use freelink_cache::{Cache, Key, MemoryCache};

pub mod accounts;
pub mod portfolio;
pub mod skills;
pub mod subscriptions;

pub type Storage = Arc<dyn StorageBackend + Send + Sync>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         FailingCache                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct Injected;

impl std::fmt::Display for Injected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "injected cache failure")
    }
}

impl std::error::Error for Injected {}

/// A [MemoryCache] that can be told to fail, or to stall
///
/// Each of `get`, `set` & `delete` can be switched to fail independently, at any time; clones share
/// their switches. With [hold_sets](FailingCache::hold_sets) on, each `set` parks until
/// [release_set](FailingCache::release_set) is called, which lets a suite line other operations up
/// against a reader that's about to populate an entry.
#[derive(Clone, Debug, Default)]
pub struct FailingCache {
    inner: MemoryCache,
    fail_gets: Arc<AtomicBool>,
    fail_sets: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    hold_sets: Arc<AtomicBool>,
    set_parked: Arc<Notify>,
    set_released: Arc<Notify>,
}

impl FailingCache {
    pub fn new() -> FailingCache {
        FailingCache::default()
    }
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }
    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
    pub fn hold_sets(&self, hold: bool) {
        self.hold_sets.store(hold, Ordering::SeqCst);
    }
    /// Wait until a `set` has parked
    pub async fn set_parked(&self) {
        self.set_parked.notified().await
    }
    /// Let one parked (or the next) `set` proceed
    pub fn release_set(&self) {
        self.set_released.notify_one()
    }
}

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, key: &Key) -> freelink_cache::Result<Option<Vec<u8>>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(freelink_cache::Error::new(Injected));
        }
        self.inner.get(key).await
    }
    async fn set(
        &self,
        key: &Key,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> freelink_cache::Result<()> {
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(freelink_cache::Error::new(Injected));
        }
        if self.hold_sets.load(Ordering::SeqCst) {
            self.set_parked.notify_one();
            self.set_released.notified().await;
        }
        self.inner.set(key, value, ttl).await
    }
    async fn delete(&self, key: &Key) -> freelink_cache::Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(freelink_cache::Error::new(Injected));
        }
        self.inner.delete(key).await
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Harness                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Everything a suite needs to drive freelink & look behind its back
pub struct Harness {
    pub state: Arc<Freelink>,
    pub cache: FailingCache,
    pub sender: MemorySender,
}

impl Harness {
    pub fn new(storage: Storage) -> Harness {
        Harness::with_otp_ttl(storage, DEFAULT_OTP_TTL)
    }
    pub fn with_otp_ttl(storage: Storage, otp_ttl: Duration) -> Harness {
        let cache = FailingCache::new();
        let sender = MemorySender::new();
        Harness {
            state: Arc::new(
                Freelink::new(storage, Arc::new(cache.clone()), Arc::new(sender.clone()))
                    .with_otp_ttl(otp_ttl),
            ),
            cache,
            sender,
        }
    }
    /// Register a user with `phone` & verify them with the code they were sent
    pub async fn freelancer(&self, phone: &str) -> Result<(User, Profile), Failed> {
        let phone = PhoneNumber::new(phone)?;
        let (_, profile) = users::register(&self.state, &phone, None).await?;
        let code = self.code_for(&phone).await?;
        let user = users::verify(&self.state, &phone, &code).await?;
        Ok((user, profile))
    }
    /// Create an administrator
    pub async fn admin(&self, phone: &str) -> Result<User, Failed> {
        let (user, _) = users::add_admin(&self.state, &PhoneNumber::new(phone)?).await?;
        Ok(user)
    }
    /// The last code sent to `phone`
    pub async fn code_for(&self, phone: &PhoneNumber) -> Result<SecretString, Failed> {
        self.sender
            .last_code(phone)
            .await
            .ok_or_else(|| Failed::from(format!("No code was sent to {phone}")))
    }
}
