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

//! # freelink
//!
//! The freelink library: a backend for a freelancer network. Users register with a phone number,
//! keep a profile, list their skills, show off portfolios & follow one another.
//!
//! Operations are plain async functions taking the application state, [Freelink], by reference;
//! they're grouped by area into [users], [subscriptions], [skills], [portfolio] & (for the read
//! path) [selectors]. Storage is pluggable ([storage::Backend]; [memory] & [sqlite] ship with the
//! crate), as is the cache ([freelink_cache::Cache]).
//!
//! The library crate has the same name as the binary would, so the CLI is named `flctl`.
//!
//! [Freelink]: freelink::Freelink
pub mod entities;
pub mod freelink;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod otp;
pub mod portfolio;
pub mod selectors;
pub mod skills;
pub mod sqlite;
pub mod storage;
pub mod subscriptions;
pub mod users;
