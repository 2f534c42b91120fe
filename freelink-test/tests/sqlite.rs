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

//! Run the freelink integration suites against SQLite
//!
//! Each test gets its own database file, in its own temporary directory, so that the tests can run
//! in parallel & nothing survives them.

use std::{process::ExitCode, sync::Arc};

use freelink::sqlite::Sqlite;
use libtest_mimic::Failed;
use tempfile::TempDir;

use common::Fixture;

mod common;

fn mk_fixture() -> Result<Fixture, Failed> {
    let dir = TempDir::new()?;
    let storage = Sqlite::open(dir.path().join("freelink.db"))?;
    Ok(Fixture::new(Arc::new(storage), Some(dir)))
}

fn main() -> common::Result<ExitCode> {
    common::run(mk_fixture)
}
