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

//! Test framework shared by the freelink integration test programs
//!
//! Each program (one per storage backend) supplies a way to make a fresh backend; everything else
//! (the tests themselves, configuration, logging, running) lives here.

use std::{env, fs, future::Future, io, process::ExitCode};

use itertools::Itertools;
use libtest_mimic::{Arguments, Failed, Trial};
use serde::Deserialize;
use snafu::{IntoError, prelude::*};
use tap::Pipe;
use tempfile::TempDir;
use tracing::debug;
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::{Directive, ParseError},
    fmt,
    layer::SubscriberExt,
};

use freelink_test::{Storage, accounts, portfolio, skills, subscriptions};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read FREELINK_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Bad log level {level}: {source}"))]
    Level { level: String, source: ParseError },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Common test configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    /// Log to stdout while testing
    pub logging: bool,
    #[serde(rename = "log-level")]
    pub log_level: String,
}

impl Configuration {
    /// Obtain a [Configuration]
    ///
    /// Check the `FREELINK_TEST_CONFIG` environment variable; if defined, attempt to parse a
    /// [Configuration] from the file named therein; else return a default instance.
    pub fn new() -> Result<Configuration> {
        match env::var("FREELINK_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() }),
            Err(env::VarError::NotPresent) => Ok(Configuration::default()),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            logging: false,
            log_level: "info".to_owned(),
        }
    }
}

/// A storage backend, together with anything that must outlive it
pub struct Fixture {
    pub storage: Storage,
    // Held, not read: the SQLite file lives here
    _dir: Option<TempDir>,
}

impl Fixture {
    pub fn new(storage: Storage, dir: Option<TempDir>) -> Fixture {
        Fixture { storage, _dir: dir }
    }
}

#[derive(Debug)]
pub struct Test {
    pub name: &'static str,
    pub test_fn: fn(Storage) -> std::result::Result<(), Failed>,
}

inventory::collect!(Test);

/// Drive one test to completion on its own runtime
pub fn block_on<F>(f: F) -> std::result::Result<(), Failed>
where
    F: Future<Output = std::result::Result<(), Failed>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(f)
}

fn configure_logging(config: &Configuration) -> Result<()> {
    if config.logging {
        let level = config.log_level.parse::<Directive>().context(LevelSnafu {
            level: config.log_level.clone(),
        })?;
        let filter = EnvFilter::builder()
            .with_default_directive(level)
            .from_env()
            .context(FilterSnafu)?;
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt::Layer::default().compact().with_writer(io::stdout))
                .with(filter),
        )
        .context(SetGlobalDefaultSnafu)?;
    }
    Ok(())
}

/// Run every registered [Test], each against a fresh [Fixture] from `mk_fixture`
///
/// Exits with status zero on success, 101 on test failure & 1 on error.
pub fn run(mk_fixture: fn() -> std::result::Result<Fixture, Failed>) -> Result<ExitCode> {
    // We have no way to augment the set of command-line arguments this program will accept, so
    // configuration comes from the environment.
    let config = Configuration::new()?;
    configure_logging(&config)?;
    debug!("Logging configured.");

    let args = Arguments::from_args();
    let conclusion = libtest_mimic::run(
        &args,
        inventory::iter::<Test>
            .into_iter()
            .sorted_by_key(|t| t.name)
            .map(|test| {
                Trial::test(test.name, move || {
                    let fixture = mk_fixture()?;
                    (test.test_fn)(fixture.storage.clone())
                })
            })
            .collect(),
    );

    if conclusion.has_failed() {
        Ok(ExitCode::from(101))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Registrations                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit!(Test {
    name: "subscriptions::self_subscription",
    test_fn: |storage| block_on(subscriptions::self_subscription(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::follow_lists",
    test_fn: |storage| block_on(subscriptions::follow_lists(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::duplicate_subscription",
    test_fn: |storage| block_on(subscriptions::duplicate_subscription(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::unsubscribe_twice",
    test_fn: |storage| block_on(subscriptions::unsubscribe_twice(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::unknown_target",
    test_fn: |storage| block_on(subscriptions::unknown_target(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::idempotent_reads",
    test_fn: |storage| block_on(subscriptions::idempotent_reads(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::scenario_abc",
    test_fn: |storage| block_on(subscriptions::scenario_abc(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::follower_order",
    test_fn: |storage| block_on(subscriptions::follower_order(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::directedness",
    test_fn: |storage| block_on(subscriptions::directedness(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::failed_invalidation",
    test_fn: |storage| block_on(subscriptions::failed_invalidation(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::failed_reads",
    test_fn: |storage| block_on(subscriptions::failed_reads(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::concurrent_subscriptions",
    test_fn: |storage| block_on(subscriptions::concurrent_subscriptions(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::populate_racing_subscribe",
    test_fn: |storage| block_on(subscriptions::populate_racing_subscribe(storage)),
});

inventory::submit!(Test {
    name: "subscriptions::readers_wait_for_staged_changes",
    test_fn: |storage| block_on(subscriptions::readers_wait_for_staged_changes(storage)),
});

inventory::submit!(Test {
    name: "accounts::register_and_verify",
    test_fn: |storage| block_on(accounts::register_and_verify(storage)),
});

inventory::submit!(Test {
    name: "accounts::bad_registrations",
    test_fn: |storage| block_on(accounts::bad_registrations(storage)),
});

inventory::submit!(Test {
    name: "accounts::bad_codes",
    test_fn: |storage| block_on(accounts::bad_codes(storage)),
});

inventory::submit!(Test {
    name: "accounts::otp_expiry",
    test_fn: |storage| block_on(accounts::otp_expiry(storage)),
});

inventory::submit!(Test {
    name: "accounts::profiles",
    test_fn: |storage| block_on(accounts::profiles(storage)),
});

inventory::submit!(Test {
    name: "skills::admins_only",
    test_fn: |storage| block_on(skills::admins_only(storage)),
});

inventory::submit!(Test {
    name: "skills::category_choices_follow_publication",
    test_fn: |storage| block_on(skills::category_choices_follow_publication(storage)),
});

inventory::submit!(Test {
    name: "skills::category_choices_racing_publication",
    test_fn: |storage| block_on(skills::category_choices_racing_publication(storage)),
});

inventory::submit!(Test {
    name: "skills::skill_selection",
    test_fn: |storage| block_on(skills::skill_selection(storage)),
});

inventory::submit!(Test {
    name: "portfolio::lifecycle",
    test_fn: |storage| block_on(portfolio::lifecycle(storage)),
});

inventory::submit!(Test {
    name: "portfolio::ownership",
    test_fn: |storage| block_on(portfolio::ownership(storage)),
});
