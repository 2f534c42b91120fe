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

//! # sqlite
//!
//! [Storage] implementation for SQLite.
//!
//! [Storage]: crate::storage
//!
//! A single [Connection] behind a [tokio::sync::Mutex]. rusqlite is synchronous, so the SQL itself
//! lives in plain functions & closures taking a `&Connection`; the async [Backend] methods take the
//! lock & run them without awaiting anything else in between. On a multi-threaded runtime that
//! work goes through [tokio::task::block_in_place], so a slow statement ties up one worker thread
//! rather than every task queued behind it on that worker. All statements are still serialized on
//! the one connection, which suits the CLI & modest concurrency rather than a busy server.
//!
//! Timestamps are stored as microseconds since the Unix epoch; identifiers in their hyphenated
//! textual form (which sorts the same way the identifiers themselves do).

use std::{path::Path, str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Params, Row, ffi, params, types::Type,
};
use snafu::{Backtrace, IntoError, prelude::*};
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::{Mutex, OwnedMutexGuard},
};
use tracing::{debug, warn};

use crate::{
    entities::{
        Age, Category, CategoryId, Comment, CommentId, PhoneNumber, Portfolio, PortfolioId,
        Profile, ProfileId, ProfileSummary, Skill, SkillId, Slug, Subscription, User, UserId,
    },
    storage::{
        self, Backend, CategoryExistsSnafu, DuplicateSubscriptionSnafu, NotSubscribedSnafu,
        PhoneNumberClaimedSnafu, PortfolioExistsSnafu, SelfSubscriptionSnafu,
        SkillAlreadySelectedSnafu, SkillExistsSnafu, Staged, UnknownCategorySnafu,
        UnknownPortfolioSnafu, UnknownProfileSnafu,
    },
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to begin a transaction: {source}"))]
    Begin {
        source: rusqlite::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to commit: {source}"))]
    Commit {
        source: rusqlite::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to open SQLite database {path}: {source}"))]
    Open {
        path: String,
        source: rusqlite::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("SQLite query failed: {source}"))]
    Query {
        source: rusqlite::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to roll back: {source}"))]
    Rollback {
        source: rusqlite::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create the freelink schema: {source}"))]
    Schema {
        source: rusqlite::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

use storage::Error as StorError;

impl std::convert::From<Error> for StorError {
    fn from(value: Error) -> Self {
        StorError::new(value)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Schema                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    phone TEXT NOT NULL,
    active INTEGER NOT NULL,
    admin INTEGER NOT NULL,
    created INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_phone ON users(phone);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    email TEXT,
    bio TEXT,
    age INTEGER,
    sex TEXT,
    city TEXT,
    plan TEXT NOT NULL,
    score INTEGER NOT NULL,
    views INTEGER NOT NULL,
    created INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_user ON profiles(user_id);
CREATE INDEX IF NOT EXISTS idx_profiles_score ON profiles(score DESC);

CREATE TABLE IF NOT EXISTS subscriptions (
    follower_id TEXT NOT NULL REFERENCES profiles(id),
    target_id TEXT NOT NULL REFERENCES profiles(id),
    created INTEGER NOT NULL,
    CHECK (follower_id <> target_id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_pair
    ON subscriptions(follower_id, target_id);
CREATE INDEX IF NOT EXISTS idx_subscriptions_target ON subscriptions(target_id);

CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    published INTEGER NOT NULL,
    created INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_slug ON categories(slug);

CREATE TABLE IF NOT EXISTS skills (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    category_id TEXT NOT NULL REFERENCES categories(id),
    published INTEGER NOT NULL,
    created INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_skills_slug ON skills(slug);

CREATE TABLE IF NOT EXISTS profile_skills (
    profile_id TEXT NOT NULL REFERENCES profiles(id),
    skill_id TEXT NOT NULL REFERENCES skills(id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_profile_skills_pair
    ON profile_skills(profile_id, skill_id);

CREATE TABLE IF NOT EXISTS portfolios (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL REFERENCES profiles(id),
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    description TEXT,
    views INTEGER NOT NULL,
    published INTEGER NOT NULL,
    created INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_portfolios_slug ON portfolios(slug);

CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY,
    portfolio_id TEXT NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    author_id TEXT NOT NULL REFERENCES profiles(id),
    text TEXT NOT NULL,
    created INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comments_portfolio ON comments(portfolio_id);
";

const USER_COLUMNS: &str = "id, phone, active, admin, created";
const PROFILE_COLUMNS: &str =
    "id, user_id, email, bio, age, sex, city, plan, score, views, created";
const CATEGORY_COLUMNS: &str = "id, name, slug, published, created";
const SKILL_COLUMNS: &str = "id, name, slug, category_id, published, created";
const PORTFOLIO_COLUMNS: &str =
    "id, profile_id, title, slug, description, views, published, created";
const COMMENT_COLUMNS: &str = "id, portfolio_id, author_id, text, created";

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Row decoding                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn conversion_failure(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

/// Read column `idx` as text & parse it
fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, String>(idx)?
        .parse::<T>()
        .map_err(|err| conversion_failure(idx, Type::Text, err))
}

fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, Option<String>>(idx)?
        .map(|text| text.parse::<T>())
        .transpose()
        .map_err(|err| conversion_failure(idx, Type::Text, err))
}

#[derive(Debug, Snafu)]
#[snafu(display("{micros} is not a representable timestamp"))]
struct BadTimestamp {
    micros: i64,
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| conversion_failure(idx, Type::Integer, BadTimestamp { micros }))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parsed(row, 0)?,
        phone: parsed(row, 1)?,
        active: row.get(2)?,
        admin: row.get(3)?,
        created: timestamp(row, 4)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        email: parsed_opt(row, 2)?,
        bio: parsed_opt(row, 3)?,
        age: row
            .get::<_, Option<u8>>(4)?
            .map(Age::new)
            .transpose()
            .map_err(|err| conversion_failure(4, Type::Integer, err))?,
        sex: parsed_opt(row, 5)?,
        city: parsed_opt(row, 6)?,
        plan: parsed(row, 7)?,
        score: row.get(8)?,
        views: row.get::<_, i64>(9)? as u64,
        created: timestamp(row, 10)?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: parsed(row, 0)?,
        name: parsed(row, 1)?,
        slug: parsed(row, 2)?,
        published: row.get(3)?,
        created: timestamp(row, 4)?,
    })
}

fn skill_from_row(row: &Row<'_>) -> rusqlite::Result<Skill> {
    Ok(Skill {
        id: parsed(row, 0)?,
        name: parsed(row, 1)?,
        slug: parsed(row, 2)?,
        category: parsed(row, 3)?,
        published: row.get(4)?,
        created: timestamp(row, 5)?,
    })
}

fn portfolio_from_row(row: &Row<'_>) -> rusqlite::Result<Portfolio> {
    Ok(Portfolio {
        id: parsed(row, 0)?,
        profile: parsed(row, 1)?,
        title: parsed(row, 2)?,
        slug: parsed(row, 3)?,
        description: parsed_opt(row, 4)?,
        views: row.get::<_, i64>(5)? as u64,
        published: row.get(6)?,
        created: timestamp(row, 7)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: parsed(row, 0)?,
        portfolio: parsed(row, 1)?,
        author: parsed(row, 2)?,
        text: parsed(row, 3)?,
        created: timestamp(row, 4)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileSummary> {
    Ok(ProfileSummary {
        id: parsed(row, 0)?,
        email: parsed_opt(row, 1)?,
        city: parsed_opt(row, 2)?,
        score: row.get(3)?,
        plan: parsed(row, 4)?,
        since: timestamp(row, 5)?,
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Query utilities                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> rusqlite::Result<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?.collect::<rusqlite::Result<Vec<T>>>();
    rows
}

fn query_opt<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> rusqlite::Result<Option<T>>
where
    P: Params,
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    conn.query_row(sql, params, f).optional()
}

/// If `err` is a constraint violation, return SQLite's extended result code
fn constraint_violation(err: &rusqlite::Error) -> Option<std::ffi::c_int> {
    match err {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            Some(err.extended_code)
        }
        _ => None,
    }
}

fn profile_exists(conn: &Connection, id: &ProfileId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM profiles WHERE id = ?1)",
        params![id.to_string()],
        |row| row.get(0),
    )
}

fn profile_for_id(conn: &Connection, id: &ProfileId) -> rusqlite::Result<Option<Profile>> {
    query_opt(
        conn,
        &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
        params![id.to_string()],
        profile_from_row,
    )
}

fn user_for_id(conn: &Connection, id: &UserId) -> rusqlite::Result<Option<User>> {
    query_opt(
        conn,
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id.to_string()],
        user_from_row,
    )
}

fn portfolio_for_slug(conn: &Connection, slug: &Slug) -> rusqlite::Result<Option<Portfolio>> {
    query_opt(
        conn,
        &format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE slug = ?1"),
        params![slug.as_ref()],
        portfolio_from_row,
    )
}

fn insert_user(conn: &mut Connection, user: &User, profile: &Profile) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            user.id.to_string(),
            user.phone.as_ref(),
            user.active,
            user.admin,
            user.created.timestamp_micros()
        ],
    )?;
    tx.execute(
        &format!(
            "INSERT INTO profiles ({PROFILE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            profile.id.to_string(),
            profile.user_id.to_string(),
            profile.email.as_deref(),
            profile.bio.as_deref(),
            profile.age.map(u8::from),
            profile.sex.map(|sex| sex.to_string()),
            profile.city.as_deref(),
            profile.plan.to_string(),
            profile.score,
            profile.views as i64,
            profile.created.timestamp_micros()
        ],
    )?;
    tx.commit()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Staged changes                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An open `BEGIN IMMEDIATE` transaction holding the connection
///
/// If dropped before [Staged::commit] or [Staged::rollback] succeeds, the transaction is rolled
/// back.
struct StagedTxn {
    conn: OwnedMutexGuard<Connection>,
    done: bool,
}

impl StagedTxn {
    async fn begin(conn: Arc<Mutex<Connection>>) -> Result<StagedTxn> {
        let conn = conn.lock_owned().await;
        blocking(|| conn.execute_batch("BEGIN IMMEDIATE")).context(BeginSnafu)?;
        Ok(StagedTxn { conn, done: false })
    }
    /// Run `COMMIT` or `ROLLBACK`; the transaction only counts as finished once that succeeds
    fn finish(&mut self, sql: &str) -> rusqlite::Result<()> {
        blocking(|| self.conn.execute_batch(sql))?;
        self.done = true;
        Ok(())
    }
}

impl Drop for StagedTxn {
    fn drop(&mut self) {
        if !self.done {
            debug!("Rolling back an abandoned subscription change");
            if let Err(err) = blocking(|| self.conn.execute_batch("ROLLBACK")) {
                warn!("Failed to roll back an abandoned subscription change: {err}");
            }
        }
    }
}

#[async_trait]
impl Staged for StagedTxn {
    async fn commit(self: Box<Self>) -> StdResult<(), StorError> {
        let mut this = self;
        this.finish("COMMIT").context(CommitSnafu)?;
        Ok(())
    }
    async fn rollback(self: Box<Self>) -> StdResult<(), StorError> {
        let mut this = self;
        this.finish("ROLLBACK").context(RollbackSnafu)?;
        Ok(())
    }
}

/// Insert `sub` inside an open transaction
fn insert_subscription(conn: &Connection, sub: &Subscription) -> StdResult<(), StorError> {
    for id in [&sub.follower, &sub.target] {
        ensure!(
            profile_exists(conn, id).context(QuerySnafu)?,
            UnknownProfileSnafu { id: *id }
        );
    }
    let res = conn.execute(
        "INSERT INTO subscriptions (follower_id, target_id, created) VALUES (?1, ?2, ?3)",
        params![
            sub.follower.to_string(),
            sub.target.to_string(),
            sub.created.timestamp_micros()
        ],
    );
    match res {
        Ok(_) => Ok(()),
        Err(err) => match constraint_violation(&err) {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => DuplicateSubscriptionSnafu {
                follower: sub.follower,
                target: sub.target,
            }
            .fail(),
            Some(ffi::SQLITE_CONSTRAINT_CHECK) => SelfSubscriptionSnafu.fail(),
            _ => Err(QuerySnafu.into_error(err).into()),
        },
    }
}

/// Delete the edge (`follower`, `target`) inside an open transaction, returning it
fn remove_subscription(
    conn: &Connection,
    follower: &ProfileId,
    target: &ProfileId,
) -> StdResult<Subscription, StorError> {
    let sub = query_opt(
        conn,
        "SELECT created FROM subscriptions WHERE follower_id = ?1 AND target_id = ?2",
        params![follower.to_string(), target.to_string()],
        |row| timestamp(row, 0),
    )
    .context(QuerySnafu)?
    .map(|created| Subscription {
        follower: *follower,
        target: *target,
        created,
    })
    .context(NotSubscribedSnafu {
        follower: *follower,
        target: *target,
    })?;
    conn.execute(
        "DELETE FROM subscriptions WHERE follower_id = ?1 AND target_id = ?2",
        params![follower.to_string(), target.to_string()],
    )
    .context(QuerySnafu)?;
    Ok(sub)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Sqlite                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Run synchronous SQLite work without stalling the other tasks scheduled on this worker
///
/// On a multi-threaded runtime this is [tokio::task::block_in_place]; on a current-thread runtime
/// (where that would panic) the work simply runs inline.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// SQLite-backed freelink storage
#[derive(Clone)]
pub struct Sqlite {
    conn: Arc<Mutex<Connection>>,
}

impl Sqlite {
    /// Open (creating if need be) the database at `path` & make sure the schema is in place
    pub fn open(path: impl AsRef<Path>) -> Result<Sqlite> {
        let path = path.as_ref();
        let conn = Connection::open(path).context(OpenSnafu {
            path: path.display().to_string(),
        })?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .context(SchemaSnafu)?;
        Sqlite::from_connection(conn)
    }
    /// A private, in-memory database
    pub fn open_in_memory() -> Result<Sqlite> {
        Sqlite::from_connection(Connection::open_in_memory().context(OpenSnafu {
            path: ":memory:".to_owned(),
        })?)
    }
    fn from_connection(conn: Connection) -> Result<Sqlite> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context(SchemaSnafu)?;
        conn.execute_batch(SCHEMA).context(SchemaSnafu)?;
        Ok(Sqlite {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
    /// Take the connection & run `f` against it
    async fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let mut conn = self.conn.lock().await;
        blocking(|| f(&mut conn))
    }
}

#[async_trait]
impl Backend for Sqlite {
    async fn add_user(&self, user: &User, profile: &Profile) -> StdResult<(), StorError> {
        match self.with_conn(|conn| insert_user(conn, user, profile)).await {
            Err(err) if constraint_violation(&err) == Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                PhoneNumberClaimedSnafu {
                    phone: user.phone.clone(),
                }
                .fail()
            }
            res => Ok(res.context(QuerySnafu)?),
        }
    }

    async fn user_for_phone(&self, phone: &PhoneNumber) -> StdResult<Option<User>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_opt(
                    conn,
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE phone = ?1"),
                    params![phone.as_ref()],
                    user_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn user_for_id(&self, id: &UserId) -> StdResult<Option<User>, StorError> {
        Ok(self
            .with_conn(|conn| user_for_id(conn, id))
            .await
            .context(QuerySnafu)?)
    }

    async fn activate_user(&self, id: &UserId) -> StdResult<Option<User>, StorError> {
        Ok(self
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE users SET active = 1 WHERE id = ?1",
                    params![id.to_string()],
                )?;
                user_for_id(conn, id)
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn profile_for_id(&self, id: &ProfileId) -> StdResult<Option<Profile>, StorError> {
        Ok(self
            .with_conn(|conn| profile_for_id(conn, id))
            .await
            .context(QuerySnafu)?)
    }

    async fn profile_for_user(&self, id: &UserId) -> StdResult<Option<Profile>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_opt(
                    conn,
                    &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?1"),
                    params![id.to_string()],
                    profile_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn update_profile(&self, profile: &Profile) -> StdResult<(), StorError> {
        let n = self
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE profiles SET email = ?2, bio = ?3, age = ?4, sex = ?5, city = ?6 \
                     WHERE id = ?1",
                    params![
                        profile.id.to_string(),
                        profile.email.as_deref(),
                        profile.bio.as_deref(),
                        profile.age.map(u8::from),
                        profile.sex.map(|sex| sex.to_string()),
                        profile.city.as_deref(),
                    ],
                )
            })
            .await
            .context(QuerySnafu)?;
        ensure!(n > 0, UnknownProfileSnafu { id: profile.id });
        Ok(())
    }

    async fn increment_profile_views(
        &self,
        id: &ProfileId,
    ) -> StdResult<Option<Profile>, StorError> {
        Ok(self
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE profiles SET views = views + 1 WHERE id = ?1",
                    params![id.to_string()],
                )?;
                profile_for_id(conn, id)
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn profiles_by_score(&self) -> StdResult<Vec<Profile>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_all(
                    conn,
                    &format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY score DESC, id"),
                    [],
                    profile_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn stage_subscription(
        &self,
        sub: &Subscription,
    ) -> StdResult<Box<dyn Staged>, StorError> {
        let staged = StagedTxn::begin(self.conn.clone()).await?;
        // On failure, dropping `staged` rolls the transaction back
        blocking(|| insert_subscription(&staged.conn, sub))?;
        Ok(Box::new(staged))
    }

    async fn stage_unsubscription(
        &self,
        follower: &ProfileId,
        target: &ProfileId,
    ) -> StdResult<(Subscription, Box<dyn Staged>), StorError> {
        let staged = StagedTxn::begin(self.conn.clone()).await?;
        let sub = blocking(|| remove_subscription(&staged.conn, follower, target))?;
        let staged: Box<dyn Staged> = Box::new(staged);
        Ok((sub, staged))
    }

    async fn subscription(
        &self,
        follower: &ProfileId,
        target: &ProfileId,
    ) -> StdResult<Option<Subscription>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_opt(
                    conn,
                    "SELECT created FROM subscriptions WHERE follower_id = ?1 AND target_id = ?2",
                    params![follower.to_string(), target.to_string()],
                    |row| timestamp(row, 0),
                )
            })
            .await
            .context(QuerySnafu)?
            .map(|created| Subscription {
                follower: *follower,
                target: *target,
                created,
            }))
    }

    async fn followers(&self, target: &ProfileId) -> StdResult<Vec<ProfileSummary>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_all(
                    conn,
                    "SELECT p.id, p.email, p.city, p.score, p.plan, s.created \
                     FROM subscriptions s JOIN profiles p ON p.id = s.follower_id \
                     WHERE s.target_id = ?1 ORDER BY s.created, p.id",
                    params![target.to_string()],
                    summary_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn followings(&self, follower: &ProfileId) -> StdResult<Vec<ProfileSummary>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_all(
                    conn,
                    "SELECT p.id, p.email, p.city, p.score, p.plan, s.created \
                     FROM subscriptions s JOIN profiles p ON p.id = s.target_id \
                     WHERE s.follower_id = ?1 ORDER BY s.created, p.id",
                    params![follower.to_string()],
                    summary_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn add_category(&self, category: &Category) -> StdResult<(), StorError> {
        let res = self
            .with_conn(|conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO categories ({CATEGORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
                    ),
                    params![
                        category.id.to_string(),
                        category.name.as_ref(),
                        category.slug.as_ref(),
                        category.published,
                        category.created.timestamp_micros()
                    ],
                )
            })
            .await;
        match res {
            Err(err) if constraint_violation(&err) == Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                CategoryExistsSnafu {
                    slug: category.slug.clone(),
                }
                .fail()
            }
            res => {
                res.context(QuerySnafu)?;
                Ok(())
            }
        }
    }

    async fn category_for_slug(&self, slug: &Slug) -> StdResult<Option<Category>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_opt(
                    conn,
                    &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE slug = ?1"),
                    params![slug.as_ref()],
                    category_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn category_for_name(&self, name: &str) -> StdResult<Option<Category>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_opt(
                    conn,
                    &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE name = ?1"),
                    params![name],
                    category_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn set_category_published(
        &self,
        slug: &Slug,
        published: bool,
    ) -> StdResult<bool, StorError> {
        Ok(self
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE categories SET published = ?2 WHERE slug = ?1",
                    params![slug.as_ref(), published],
                )
            })
            .await
            .context(QuerySnafu)?
            > 0)
    }

    async fn categories(&self, published_only: bool) -> StdResult<Vec<Category>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_all(
                    conn,
                    &format!(
                        "SELECT {CATEGORY_COLUMNS} FROM categories \
                         WHERE (?1 = 0 OR published = 1) ORDER BY name, id"
                    ),
                    params![published_only],
                    category_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn add_skill(&self, skill: &Skill) -> StdResult<(), StorError> {
        let res = self
            .with_conn(|conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO skills ({SKILL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                    ),
                    params![
                        skill.id.to_string(),
                        skill.name.as_ref(),
                        skill.slug.as_ref(),
                        skill.category.to_string(),
                        skill.published,
                        skill.created.timestamp_micros()
                    ],
                )
            })
            .await;
        match res.as_ref().err().and_then(constraint_violation) {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => SkillExistsSnafu {
                slug: skill.slug.clone(),
            }
            .fail(),
            Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => UnknownCategorySnafu {
                id: skill.category,
            }
            .fail(),
            _ => {
                res.context(QuerySnafu)?;
                Ok(())
            }
        }
    }

    async fn skill_for_slug(&self, slug: &Slug) -> StdResult<Option<Skill>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_opt(
                    conn,
                    &format!("SELECT {SKILL_COLUMNS} FROM skills WHERE slug = ?1"),
                    params![slug.as_ref()],
                    skill_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn set_skill_published(
        &self,
        slug: &Slug,
        published: bool,
    ) -> StdResult<bool, StorError> {
        Ok(self
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE skills SET published = ?2 WHERE slug = ?1",
                    params![slug.as_ref(), published],
                )
            })
            .await
            .context(QuerySnafu)?
            > 0)
    }

    async fn skills(
        &self,
        category: Option<&CategoryId>,
        published_only: bool,
    ) -> StdResult<Vec<Skill>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_all(
                    conn,
                    &format!(
                        "SELECT {SKILL_COLUMNS} FROM skills \
                         WHERE (?1 IS NULL OR category_id = ?1) AND (?2 = 0 OR published = 1) \
                         ORDER BY name, id"
                    ),
                    params![category.map(|id| id.to_string()), published_only],
                    skill_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn add_profile_skill(
        &self,
        profile: &ProfileId,
        skill: &SkillId,
    ) -> StdResult<(), StorError> {
        let res = self
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO profile_skills (profile_id, skill_id) VALUES (?1, ?2)",
                    params![profile.to_string(), skill.to_string()],
                )
            })
            .await;
        match res.as_ref().err().and_then(constraint_violation) {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => SkillAlreadySelectedSnafu {
                profile: *profile,
                skill: *skill,
            }
            .fail(),
            Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => {
                UnknownProfileSnafu { id: *profile }.fail()
            }
            _ => {
                res.context(QuerySnafu)?;
                Ok(())
            }
        }
    }

    async fn skills_for_profile(&self, profile: &ProfileId) -> StdResult<Vec<Skill>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_all(
                    conn,
                    "SELECT s.id, s.name, s.slug, s.category_id, s.published, s.created \
                     FROM skills s JOIN profile_skills ps ON ps.skill_id = s.id \
                     WHERE ps.profile_id = ?1 ORDER BY s.name, s.id",
                    params![profile.to_string()],
                    skill_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn add_portfolio(&self, portfolio: &Portfolio) -> StdResult<(), StorError> {
        let res = self
            .with_conn(|conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO portfolios ({PORTFOLIO_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    params![
                        portfolio.id.to_string(),
                        portfolio.profile.to_string(),
                        portfolio.title.as_ref(),
                        portfolio.slug.as_ref(),
                        portfolio.description.as_deref(),
                        portfolio.views as i64,
                        portfolio.published,
                        portfolio.created.timestamp_micros()
                    ],
                )
            })
            .await;
        match res.as_ref().err().and_then(constraint_violation) {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => PortfolioExistsSnafu {
                slug: portfolio.slug.clone(),
            }
            .fail(),
            Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => UnknownProfileSnafu {
                id: portfolio.profile,
            }
            .fail(),
            _ => {
                res.context(QuerySnafu)?;
                Ok(())
            }
        }
    }

    async fn portfolio_for_slug(&self, slug: &Slug) -> StdResult<Option<Portfolio>, StorError> {
        Ok(self
            .with_conn(|conn| portfolio_for_slug(conn, slug))
            .await
            .context(QuerySnafu)?)
    }

    async fn increment_portfolio_views(
        &self,
        slug: &Slug,
    ) -> StdResult<Option<Portfolio>, StorError> {
        Ok(self
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE portfolios SET views = views + 1 WHERE slug = ?1",
                    params![slug.as_ref()],
                )?;
                portfolio_for_slug(conn, slug)
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn set_portfolio_published(
        &self,
        id: &PortfolioId,
        published: bool,
    ) -> StdResult<(), StorError> {
        let n = self
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE portfolios SET published = ?2 WHERE id = ?1",
                    params![id.to_string(), published],
                )
            })
            .await
            .context(QuerySnafu)?;
        ensure!(n > 0, UnknownPortfolioSnafu { id: *id });
        Ok(())
    }

    async fn delete_portfolio(&self, id: &PortfolioId) -> StdResult<(), StorError> {
        let n = self
            .with_conn(|conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM comments WHERE portfolio_id = ?1",
                    params![id.to_string()],
                )?;
                let n = tx.execute(
                    "DELETE FROM portfolios WHERE id = ?1",
                    params![id.to_string()],
                )?;
                tx.commit()?;
                Ok(n)
            })
            .await
            .context(QuerySnafu)?;
        ensure!(n > 0, UnknownPortfolioSnafu { id: *id });
        Ok(())
    }

    async fn portfolios_for_profile(
        &self,
        profile: &ProfileId,
    ) -> StdResult<Vec<Portfolio>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_all(
                    conn,
                    &format!(
                        "SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE profile_id = ?1 \
                         ORDER BY created, id"
                    ),
                    params![profile.to_string()],
                    portfolio_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn add_comment(&self, comment: &Comment) -> StdResult<(), StorError> {
        let res = self
            .with_conn(|conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO comments ({COMMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
                    ),
                    params![
                        comment.id.to_string(),
                        comment.portfolio.to_string(),
                        comment.author.to_string(),
                        comment.text.as_ref(),
                        comment.created.timestamp_micros()
                    ],
                )
            })
            .await;
        match res.as_ref().err().and_then(constraint_violation) {
            Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => UnknownPortfolioSnafu {
                id: comment.portfolio,
            }
            .fail(),
            _ => {
                res.context(QuerySnafu)?;
                Ok(())
            }
        }
    }

    async fn comment_for_id(&self, id: &CommentId) -> StdResult<Option<Comment>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_opt(
                    conn,
                    &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                    params![id.to_string()],
                    comment_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn comments_for_portfolio(
        &self,
        portfolio: &PortfolioId,
    ) -> StdResult<Vec<Comment>, StorError> {
        Ok(self
            .with_conn(|conn| {
                query_all(
                    conn,
                    &format!(
                        "SELECT {COMMENT_COLUMNS} FROM comments WHERE portfolio_id = ?1 \
                         ORDER BY created, id"
                    ),
                    params![portfolio.to_string()],
                    comment_from_row,
                )
            })
            .await
            .context(QuerySnafu)?)
    }

    async fn delete_comment(&self, id: &CommentId) -> StdResult<(), StorError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM comments WHERE id = ?1", params![id.to_string()])
        })
        .await
        .context(QuerySnafu)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::entities::{City, Name, Plan, ProfileUpdate, UserEmail};

    async fn add_profile(storage: &Sqlite, phone: &str) -> Profile {
        let user = User::new(&PhoneNumber::new(phone).unwrap());
        let profile = Profile::new(&user.id(), None);
        storage.add_user(&user, &profile).await.unwrap();
        profile
    }

    #[tokio::test]
    async fn users_and_profiles() {
        let storage = Sqlite::open_in_memory().unwrap();
        let phone = PhoneNumber::new("09131111111").unwrap();
        let user = User::new(&phone);
        let mut profile = Profile::new(&user.id(), None);
        storage.add_user(&user, &profile).await.unwrap();

        // Round-trips exactly, timestamps included
        assert_eq!(storage.user_for_phone(&phone).await.unwrap(), Some(user.clone()));
        assert_eq!(
            storage.profile_for_user(&user.id()).await.unwrap(),
            Some(profile.clone())
        );

        let other = User::new(&phone);
        assert!(matches!(
            storage
                .add_user(&other, &Profile::new(&other.id(), None))
                .await,
            Err(StorError::PhoneNumberClaimed { .. })
        ));
        // The failed registration left nothing behind
        assert!(storage.user_for_id(&other.id()).await.unwrap().is_none());

        profile.apply(ProfileUpdate {
            email: Some(UserEmail::new("edited@gmail.com").unwrap()),
            age: Some(Age::new(30).unwrap()),
            city: Some(City::new("Tehran").unwrap()),
            ..Default::default()
        });
        storage.update_profile(&profile).await.unwrap();
        let read = storage.profile_for_id(&profile.id()).await.unwrap().unwrap();
        assert_eq!(read, profile);
        assert_eq!(read.plan(), Plan::Free);

        let viewed = storage
            .increment_profile_views(&profile.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(viewed.views(), 1);
        assert!(
            storage
                .activate_user(&user.id())
                .await
                .unwrap()
                .unwrap()
                .is_active()
        );
    }

    #[tokio::test]
    async fn staged_subscriptions() {
        let storage = Sqlite::open_in_memory().unwrap();
        let a = add_profile(&storage, "09131111111").await;
        let b = add_profile(&storage, "09131111112").await;
        let sub = Subscription::new(&a.id(), &b.id()).unwrap();

        drop(storage.stage_subscription(&sub).await.unwrap());
        assert!(storage.subscription(&a.id(), &b.id()).await.unwrap().is_none());

        storage
            .stage_subscription(&sub)
            .await
            .unwrap()
            .rollback()
            .await
            .unwrap();
        assert!(storage.subscription(&a.id(), &b.id()).await.unwrap().is_none());

        storage
            .stage_subscription(&sub)
            .await
            .unwrap()
            .commit()
            .await
            .unwrap();
        assert_eq!(
            storage.subscription(&a.id(), &b.id()).await.unwrap(),
            Some(sub.clone())
        );
        assert!(matches!(
            storage.stage_subscription(&sub).await,
            Err(StorError::DuplicateSubscription { .. })
        ));
        // The failed attempt must not have left a transaction open
        let followings = storage.followings(&a.id()).await.unwrap();
        assert_eq!(followings.len(), 1);
        assert_eq!(followings[0].id, b.id());

        let (removed, staged) = storage
            .stage_unsubscription(&a.id(), &b.id())
            .await
            .unwrap();
        assert_eq!(removed, sub);
        staged.commit().await.unwrap();
        assert!(storage.followers(&b.id()).await.unwrap().is_empty());
        assert!(matches!(
            storage.stage_unsubscription(&a.id(), &b.id()).await,
            Err(StorError::NotSubscribed { .. })
        ));
    }

    #[tokio::test]
    async fn check_constraint() {
        let storage = Sqlite::open_in_memory().unwrap();
        let a = add_profile(&storage, "09131111111").await;
        // Get around `Subscription::new` to exercise the store's own guard
        let sub = Subscription {
            follower: a.id(),
            target: a.id(),
            created: crate::entities::now(),
        };
        assert!(matches!(
            storage.stage_subscription(&sub).await,
            Err(StorError::SelfSubscription { .. })
        ));
        let sub = Subscription::new(&a.id(), &ProfileId::new()).unwrap();
        assert!(matches!(
            storage.stage_subscription(&sub).await,
            Err(StorError::UnknownProfile { .. })
        ));
    }

    #[tokio::test]
    async fn portfolios() {
        let storage = Sqlite::open_in_memory().unwrap();
        let a = add_profile(&storage, "09131111111").await;
        let portfolio =
            Portfolio::new(&a.id(), &Name::new("New Portfolio").unwrap(), None).unwrap();
        storage.add_portfolio(&portfolio).await.unwrap();
        assert!(matches!(
            storage.add_portfolio(&portfolio).await,
            Err(StorError::PortfolioExists { .. })
        ));
        let comment = Comment::new(
            &portfolio.id(),
            &a.id(),
            &crate::entities::CommentText::new("nice").unwrap(),
        );
        storage.add_comment(&comment).await.unwrap();
        assert_eq!(
            storage.comments_for_portfolio(&portfolio.id()).await.unwrap(),
            vec![comment.clone()]
        );
        storage.delete_portfolio(&portfolio.id()).await.unwrap();
        assert!(storage.comment_for_id(&comment.id()).await.unwrap().is_none());
        assert!(
            storage
                .portfolio_for_slug(portfolio.slug())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn failed_finish_still_rolls_back() {
        let storage = Sqlite::open_in_memory().unwrap();
        let a = add_profile(&storage, "09131111111").await;
        let b = add_profile(&storage, "09131111112").await;

        let mut staged = StagedTxn::begin(storage.conn.clone()).await.unwrap();
        // End the transaction behind the handle's back so that its own ROLLBACK fails
        staged.conn.execute_batch("ROLLBACK").unwrap();
        assert!(staged.finish("ROLLBACK").is_err());
        assert!(!staged.done);
        // The handle is still responsible for whatever transaction the connection is in
        staged.conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        drop(staged);

        let sub = Subscription::new(&a.id(), &b.id()).unwrap();
        storage
            .stage_subscription(&sub)
            .await
            .unwrap()
            .commit()
            .await
            .unwrap();
        assert!(storage.subscription(&a.id(), &b.id()).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_threaded_runtime() {
        let storage = Sqlite::open_in_memory().unwrap();
        let target = add_profile(&storage, "09131111199").await.id();
        let handles = (0..8)
            .map(|i| {
                let storage = storage.clone();
                tokio::spawn(async move {
                    let follower = add_profile(&storage, &format!("0913111110{i}")).await;
                    storage
                        .stage_subscription(&Subscription::new(&follower.id(), &target).unwrap())
                        .await
                        .unwrap()
                        .commit()
                        .await
                        .unwrap();
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(storage.followers(&target).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freelink.db");
        let phone = PhoneNumber::new("09131111111").unwrap();
        {
            let storage = Sqlite::open(&path).unwrap();
            let user = User::new(&phone);
            storage
                .add_user(&user, &Profile::new(&user.id(), None))
                .await
                .unwrap();
        }
        let storage = Sqlite::open(&path).unwrap();
        assert!(storage.user_for_phone(&phone).await.unwrap().is_some());
    }
}
