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

//! # Selectors
//!
//! The freelink read path. A few selectors are served through the cache ("read-through"):
//!
//! - look the key up; on a hit, return the cached value without touching the store
//! - on a miss, compute the value from the store, write it to the cache with no expiry & return it
//!
//! Entries stay put until a mutation deletes them (see [subscriptions] for the follower lists,
//! [select_skill] for skills & the category publication operations for category names).
//!
//! [subscriptions]: crate::subscriptions
//! [select_skill]: crate::users::select_skill
//!
//! The cache is an optimization here, not a source of truth: a failed lookup is logged & treated
//! as a miss, and a failed write is logged & otherwise ignored.
//!
//! Concurrent misses on the same key each recompute independently. Population runs under the
//! shared side of the invalidation fence held in [Freelink], so a mutation's deletes either precede
//! a reader's lookup or follow its write-back; a value computed before a change can't be written
//! back after that change's invalidation.

use std::future::Future;

use freelink_cache::{Key, get_value, set_value};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{Backtrace, prelude::*};
use tracing::{debug, warn};

use crate::{
    counter_add,
    entities::{Category, Comment, Portfolio, Profile, ProfileSummary, Skill, Slug, User, UserId},
    freelink::{ErrorKind, Freelink},
    keys::{category_choices_key, followers_key, followings_key, skills_key},
    metrics::{self, Sort},
    storage,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("There is no category with the given slug."))]
    NoSuchCategory { slug: Slug, backtrace: Backtrace },
    #[snafu(display("There is no portfolio with the provided slug."))]
    NoSuchPortfolio { slug: Slug, backtrace: Backtrace },
    #[snafu(display("User {user} has no profile"))]
    NoSuchProfile { user: UserId, backtrace: Backtrace },
    #[snafu(display("Storage error: {source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoSuchCategory { .. }
            | Error::NoSuchPortfolio { .. }
            | Error::NoSuchProfile { .. } => ErrorKind::NotFound,
            Error::Storage { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Read-through                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("selectors.cache.hits", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("selectors.cache.misses", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("selectors.cache.errors", Sort::IntegralCounter) }

/// Serve `key` from the cache, falling back to `compute`
///
/// `compute` is only polled on a miss. The fence is held from the lookup through the write-back.
async fn read_through<T, F>(state: &Freelink, key: &Key, compute: F) -> Result<T>
where
    T: Serialize + DeserializeOwned + Sync,
    F: Future<Output = Result<T>>,
{
    let _fence = state.invalidation.read().await;
    match get_value::<T>(state.cache.as_ref(), key).await {
        Ok(Some(value)) => {
            debug!("Cache hit for {key}");
            counter_add!(state.instruments, "selectors.cache.hits", 1, &[]);
            return Ok(value);
        }
        Ok(None) => {
            debug!("Cache miss for {key}");
            counter_add!(state.instruments, "selectors.cache.misses", 1, &[]);
        }
        Err(err) => {
            warn!("Failed to read {key} from the cache; falling back to the store: {err}");
            counter_add!(state.instruments, "selectors.cache.errors", 1, &[]);
        }
    }

    let value = compute.await?;
    if let Err(err) = set_value(state.cache.as_ref(), key, &value, None).await {
        warn!("Failed to populate the cache for {key}: {err}");
        counter_add!(state.instruments, "selectors.cache.errors", 1, &[]);
    }
    Ok(value)
}

/// The names of all published categories, straight from the store
async fn published_category_names(state: &Freelink) -> Result<Vec<String>> {
    Ok(state
        .storage
        .categories(true)
        .await
        .context(StorageSnafu)?
        .into_iter()
        .map(|category| category.name().to_string())
        .collect())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Selectors                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The profiles following `profile`, oldest subscription first
pub async fn my_followers(state: &Freelink, profile: &Profile) -> Result<Vec<ProfileSummary>> {
    let id = profile.id();
    read_through(state, &followers_key(&id), async {
        state.storage.followers(&id).await.context(StorageSnafu)
    })
    .await
}

/// The profiles `profile` follows, oldest subscription first
pub async fn my_followings(state: &Freelink, profile: &Profile) -> Result<Vec<ProfileSummary>> {
    let id = profile.id();
    read_through(state, &followings_key(&id), async {
        state.storage.followings(&id).await.context(StorageSnafu)
    })
    .await
}

pub async fn my_skills(state: &Freelink, profile: &Profile) -> Result<Vec<Skill>> {
    let id = profile.id();
    read_through(state, &skills_key(&id), async {
        state
            .storage
            .skills_for_profile(&id)
            .await
            .context(StorageSnafu)
    })
    .await
}

/// All freelancers, highest score first
pub async fn freelancers(state: &Freelink) -> Result<Vec<Profile>> {
    state.storage.profiles_by_score().await.context(StorageSnafu)
}

/// The user's own profile
pub async fn get_profile(state: &Freelink, user: &User) -> Result<Profile> {
    state
        .storage
        .profile_for_user(&user.id())
        .await
        .context(StorageSnafu)?
        .context(NoSuchProfileSnafu { user: user.id() })
}

/// If `name` names a category, just that category; otherwise every published category
pub async fn categories(state: &Freelink, name: Option<&str>) -> Result<Vec<Category>> {
    if let Some(name) = name {
        if let Some(category) = state
            .storage
            .category_for_name(name)
            .await
            .context(StorageSnafu)?
        {
            return Ok(vec![category]);
        }
    }
    state.storage.categories(true).await.context(StorageSnafu)
}

/// Published skills, optionally restricted to one category
pub async fn skills(state: &Freelink, category: Option<&Slug>) -> Result<Vec<Skill>> {
    let category = match category {
        Some(slug) => Some(
            state
                .storage
                .category_for_slug(slug)
                .await
                .context(StorageSnafu)?
                .context(NoSuchCategorySnafu { slug: slug.clone() })?
                .id(),
        ),
        None => None,
    };
    state
        .storage
        .skills(category.as_ref(), true)
        .await
        .context(StorageSnafu)
}

/// The names of all published categories, in name order
pub async fn category_choices(state: &Freelink) -> Result<Vec<String>> {
    read_through(
        state,
        &category_choices_key(),
        published_category_names(state),
    )
    .await
}

pub async fn my_portfolios(state: &Freelink, profile: &Profile) -> Result<Vec<Portfolio>> {
    state
        .storage
        .portfolios_for_profile(&profile.id())
        .await
        .context(StorageSnafu)
}

/// Comments on the portfolio with slug `portfolio`, oldest first
pub async fn comments(state: &Freelink, portfolio: &Slug) -> Result<Vec<Comment>> {
    let portfolio = state
        .storage
        .portfolio_for_slug(portfolio)
        .await
        .context(StorageSnafu)?
        .context(NoSuchPortfolioSnafu {
            slug: portfolio.clone(),
        })?;
    state
        .storage
        .comments_for_portfolio(&portfolio.id())
        .await
        .context(StorageSnafu)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use freelink_cache::{Cache, MemoryCache};

    use crate::{
        entities::{Name, PhoneNumber},
        memory::InMemory,
        otp::LogSender,
        subscriptions::subscribe,
    };

    /// Wraps a [MemoryCache], counting lookups & hits
    #[derive(Clone, Default)]
    struct CountingCache {
        inner: MemoryCache,
        gets: Arc<AtomicUsize>,
        hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Cache for CountingCache {
        async fn get(&self, key: &Key) -> freelink_cache::Result<Option<Vec<u8>>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let value = self.inner.get(key).await?;
            if value.is_some() {
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
            Ok(value)
        }
        async fn set(
            &self,
            key: &Key,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> freelink_cache::Result<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &Key) -> freelink_cache::Result<()> {
            self.inner.delete(key).await
        }
    }

    async fn add_profile(state: &Freelink, phone: &str) -> Profile {
        let user = User::new(&PhoneNumber::new(phone).unwrap());
        let profile = Profile::new(&user.id(), None);
        state.storage.add_user(&user, &profile).await.unwrap();
        profile
    }

    #[tokio::test]
    async fn followers_read_through() {
        let cache = CountingCache::default();
        let state = Freelink::new(
            Arc::new(InMemory::new()),
            Arc::new(cache.clone()),
            Arc::new(LogSender),
        );
        let a = add_profile(&state, "09131111111").await;
        let b = add_profile(&state, "09131111112").await;
        let c = add_profile(&state, "09131111113").await;

        assert!(my_followers(&state, &c).await.unwrap().is_empty());
        subscribe(&state, &a, &c.id()).await.unwrap();
        // Make sure the two edges don't share a timestamp, so the order is known
        tokio::time::sleep(Duration::from_millis(2)).await;
        subscribe(&state, &b, &c.id()).await.unwrap();

        let first = my_followers(&state, &c).await.unwrap();
        assert_eq!(
            first.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![a.id(), b.id()]
        );
        let hits = cache.hits.load(Ordering::SeqCst);
        let second = my_followers(&state, &c).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.hits.load(Ordering::SeqCst), hits + 1);

        let followings = my_followings(&state, &a).await.unwrap();
        assert_eq!(followings.len(), 1);
        assert_eq!(followings[0].id, c.id());
    }

    #[tokio::test]
    async fn taxonomy_selectors() {
        let state = Freelink::new(
            Arc::new(InMemory::new()),
            Arc::new(MemoryCache::default()),
            Arc::new(LogSender),
        );
        let backend = Category::new(&Name::new("Backend").unwrap()).unwrap();
        let frontend = Category::new(&Name::new("Frontend").unwrap()).unwrap();
        state.storage.add_category(&backend).await.unwrap();
        state.storage.add_category(&frontend).await.unwrap();
        state
            .storage
            .set_category_published(backend.slug(), true)
            .await
            .unwrap();

        assert_eq!(category_choices(&state).await.unwrap(), vec!["Backend"]);
        // Asking by name finds even an unpublished category...
        assert_eq!(
            categories(&state, Some("Frontend")).await.unwrap(),
            vec![frontend.clone()]
        );
        // but an unknown name falls back to the published list
        assert_eq!(
            categories(&state, Some("Design")).await.unwrap(),
            vec![{
                let mut b = backend.clone();
                b.published = true;
                b
            }]
        );

        let django = Skill::new(&Name::new("Django").unwrap(), &backend.id()).unwrap();
        state.storage.add_skill(&django).await.unwrap();
        state
            .storage
            .set_skill_published(django.slug(), true)
            .await
            .unwrap();
        assert_eq!(skills(&state, Some(backend.slug())).await.unwrap().len(), 1);
        assert!(
            skills(&state, Some(frontend.slug()))
                .await
                .unwrap()
                .is_empty()
        );
        let err = skills(&state, Some(&Slug::new("design").unwrap()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(format!("{err}"), "There is no category with the given slug.");
    }

    #[tokio::test]
    async fn freelancers_by_score() {
        let state = Freelink::new(
            Arc::new(InMemory::new()),
            Arc::new(MemoryCache::default()),
            Arc::new(LogSender),
        );
        let user = User::new(&PhoneNumber::new("09131111111").unwrap());
        let mut low = Profile::new(&user.id(), None);
        low.score = 1;
        state.storage.add_user(&user, &low).await.unwrap();
        let user = User::new(&PhoneNumber::new("09131111112").unwrap());
        let mut high = Profile::new(&user.id(), None);
        high.score = 10;
        state.storage.add_user(&user, &high).await.unwrap();

        assert_eq!(
            freelancers(&state)
                .await
                .unwrap()
                .iter()
                .map(|p| p.id())
                .collect::<Vec<_>>(),
            vec![high.id(), low.id()]
        );
    }
}
