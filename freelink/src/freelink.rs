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

//! # The freelink application state
//!
//! Every freelink operation takes a [Freelink] by reference; it owns the collaborators those
//! operations need (storage, cache, OTP delivery & metrics) along with a few tunables.
//!
//! It also owns the invalidation fence. Read-through selectors hold it shared from their cache
//! lookup until they've written back what they computed; mutations that delete read-through
//! entries hold it exclusively from their store write until those deletes are done. A reader's
//! write-back therefore can't land after an invalidation it raced with.

use std::{fmt::Display, sync::Arc, time::Duration};

use freelink_cache::Cache;
use tokio::sync::RwLock;

use crate::{metrics::Instruments, otp::OtpSender, storage::Backend as StorageBackend};

/// Default lifetime of a one-time password
pub const DEFAULT_OTP_TTL: Duration = Duration::from_secs(120);

/// Application state available to all operations
pub struct Freelink {
    pub storage: Arc<dyn StorageBackend + Send + Sync>,
    pub cache: Arc<dyn Cache + Send + Sync>,
    pub otp_sender: Arc<dyn OtpSender + Send + Sync>,
    pub instruments: Arc<Instruments>,
    pub otp_ttl: Duration,
    pub(crate) invalidation: RwLock<()>,
}

impl Freelink {
    pub fn new(
        storage: Arc<dyn StorageBackend + Send + Sync>,
        cache: Arc<dyn Cache + Send + Sync>,
        otp_sender: Arc<dyn OtpSender + Send + Sync>,
    ) -> Freelink {
        Freelink {
            storage,
            cache,
            otp_sender,
            instruments: Arc::new(Instruments::new("freelink")),
            otp_ttl: DEFAULT_OTP_TTL,
            invalidation: RwLock::new(()),
        }
    }
    pub fn with_otp_ttl(self, otp_ttl: Duration) -> Freelink {
        Freelink { otp_ttl, ..self }
    }
}

/// Broad classification of freelink errors
///
/// Every service-level error type exposes a `kind()` method returning one of these, so that
/// whatever sits in front of freelink (an HTTP layer, say, or `flctl`) can map failures onto its
/// own vocabulary without matching on every variant.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The thing named doesn't exist
    NotFound,
    /// The request would create a relationship that can't exist (following oneself, e.g.)
    InvalidRelationship,
    /// The request conflicts with current state (a duplicate, or removing something absent)
    Conflict,
    /// The request was malformed
    Invalid,
    /// The caller isn't permitted to do this
    Forbidden,
    /// Something went wrong that isn't the caller's fault
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ErrorKind::NotFound => "not found",
                ErrorKind::InvalidRelationship => "invalid relationship",
                ErrorKind::Conflict => "conflict",
                ErrorKind::Invalid => "invalid",
                ErrorKind::Forbidden => "forbidden",
                ErrorKind::Internal => "internal error",
            }
        )
    }
}
