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

//! # Subscriptions
//!
//! ## Introduction
//!
//! Profiles may follow one another. The subscription graph is just a set of directed edges
//! (follower, target) with three rules:
//!
//! 1. no loops: a profile can't follow itself
//! 2. no parallel edges: a given follower follows a given target at most once
//! 3. direction matters: A following B says nothing about B following A
//!
//! Subscribing to a profile you already follow, or unsubscribing from one you don't, is an error,
//! not a no-op.
//!
//! ## Caching
//!
//! The follower & following lists are served through the cache (see [selectors]). Every change to
//! an edge (F, T) stales exactly two entries: F's followings & T's followers. The mutation is
//! staged in the store (which holds the store exclusively), those two keys are deleted, and only
//! then is the change committed. If the deletes fail, the staged change is rolled back & the caller
//! gets an error; at no point can a reader see the new edge set alongside an old cached list.
//!
//! All of that happens under the exclusive side of the invalidation fence (see [Freelink]), so a
//! reader that computed a list from the pre-change store can't write it back once the change is
//! done.
//!
//! [selectors]: crate::selectors

use snafu::{Backtrace, IntoError, prelude::*};
use tracing::{error, info};

use crate::{
    counter_add,
    entities::{Profile, ProfileId, Subscription},
    freelink::{ErrorKind, Freelink},
    keys::{followers_key, followings_key},
    metrics::{self, Sort},
    storage::{self, Staged},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("already following"))]
    AlreadySubscribed {
        follower: ProfileId,
        target: ProfileId,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to invalidate cached subscription lists: {source}"))]
    Cache { source: freelink_cache::Error },
    #[snafu(display("There is no profile with id {id}"))]
    NoSuchProfile { id: ProfileId, backtrace: Backtrace },
    #[snafu(display("not following"))]
    NotSubscribed {
        follower: ProfileId,
        target: ProfileId,
        backtrace: Backtrace,
    },
    #[snafu(display("cannot follow yourself"))]
    SelfSubscription { backtrace: Backtrace },
    #[snafu(display("Storage error: {source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadySubscribed { .. } => ErrorKind::Conflict,
            Error::NoSuchProfile { .. } => ErrorKind::NotFound,
            Error::NotSubscribed { .. } => ErrorKind::NotFound,
            Error::SelfSubscription { .. } => ErrorKind::InvalidRelationship,
            Error::Cache { .. } | Error::Storage { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("subscriptions.created", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("subscriptions.removed", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("subscriptions.rejected", Sort::IntegralCounter) }

/// Delete the two cache entries an edge change stales, then commit; roll back if we can't
async fn invalidate_and_commit(
    state: &Freelink,
    staged: Box<dyn Staged>,
    follower: &ProfileId,
    target: &ProfileId,
) -> Result<()> {
    let invalidated = match state.cache.delete(&followings_key(follower)).await {
        Ok(()) => state.cache.delete(&followers_key(target)).await,
        Err(err) => Err(err),
    };
    match invalidated {
        Ok(()) => staged.commit().await.context(StorageSnafu),
        Err(err) => {
            if let Err(rollback_err) = staged.rollback().await {
                error!("Failed to roll back a subscription change after {err}: {rollback_err}");
            }
            Err(CacheSnafu.into_error(err))
        }
    }
}

/// Look up the profile to which the caller refers
async fn target_profile(state: &Freelink, id: &ProfileId) -> Result<Profile> {
    state
        .storage
        .profile_for_id(id)
        .await
        .context(StorageSnafu)?
        .context(NoSuchProfileSnafu { id: *id })
}

/// `follower` would like to follow the profile identified by `target`
pub async fn subscribe(
    state: &Freelink,
    follower: &Profile,
    target: &ProfileId,
) -> Result<Subscription> {
    async fn subscribe1(
        state: &Freelink,
        follower: &Profile,
        target: &ProfileId,
    ) -> Result<Subscription> {
        let target = target_profile(state, target).await?;
        let sub = Subscription::new(&follower.id(), &target.id())
            .map_err(|_| SelfSubscriptionSnafu.build())?;
        let _fence = state.invalidation.write().await;
        let staged = state
            .storage
            .stage_subscription(&sub)
            .await
            .map_err(|err| match err {
                storage::Error::DuplicateSubscription {
                    follower, target, ..
                } => AlreadySubscribedSnafu { follower, target }.build(),
                storage::Error::SelfSubscription { .. } => SelfSubscriptionSnafu.build(),
                storage::Error::UnknownProfile { id, .. } => NoSuchProfileSnafu { id }.build(),
                err => StorageSnafu.into_error(err),
            })?;
        invalidate_and_commit(state, staged, &sub.follower(), &sub.target()).await?;
        Ok(sub)
    }

    match subscribe1(state, follower, target).await {
        Ok(sub) => {
            info!("{} now follows {}", sub.follower(), sub.target());
            counter_add!(state.instruments, "subscriptions.created", 1, &[]);
            Ok(sub)
        }
        Err(err) => {
            counter_add!(state.instruments, "subscriptions.rejected", 1, &[]);
            Err(err)
        }
    }
}

/// `follower` would no longer like to follow the profile identified by `target`
pub async fn unsubscribe(state: &Freelink, follower: &Profile, target: &ProfileId) -> Result<()> {
    let target = target_profile(state, target).await?;
    let fence = state.invalidation.write().await;
    let (sub, staged) = state
        .storage
        .stage_unsubscription(&follower.id(), &target.id())
        .await
        .map_err(|err| match err {
            storage::Error::NotSubscribed {
                follower, target, ..
            } => NotSubscribedSnafu { follower, target }.build(),
            err => StorageSnafu.into_error(err),
        })?;
    invalidate_and_commit(state, staged, &sub.follower(), &sub.target()).await?;
    drop(fence);
    info!("{} no longer follows {}", sub.follower(), sub.target());
    counter_add!(state.instruments, "subscriptions.removed", 1, &[]);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;

    use freelink_cache::{Cache, MemoryCache};

    use crate::{
        entities::{PhoneNumber, User},
        memory::InMemory,
        otp::LogSender,
    };

    async fn add_profile(state: &Freelink, phone: &str) -> Profile {
        let user = User::new(&PhoneNumber::new(phone).unwrap());
        let profile = Profile::new(&user.id(), None);
        state.storage.add_user(&user, &profile).await.unwrap();
        profile
    }

    fn state() -> (Freelink, MemoryCache) {
        let cache = MemoryCache::default();
        (
            Freelink::new(
                Arc::new(InMemory::new()),
                Arc::new(cache.clone()),
                Arc::new(LogSender),
            ),
            cache,
        )
    }

    #[tokio::test]
    async fn smoke() {
        let (state, _) = state();
        let a = add_profile(&state, "09131111111").await;
        let b = add_profile(&state, "09131111112").await;

        let sub = subscribe(&state, &a, &b.id()).await.unwrap();
        assert_eq!(sub.follower(), a.id());
        assert_eq!(sub.target(), b.id());

        let err = subscribe(&state, &a, &b.id()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadySubscribed { .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(format!("{err}"), "already following");

        // Edges are directed
        subscribe(&state, &b, &a.id()).await.unwrap();

        unsubscribe(&state, &a, &b.id()).await.unwrap();
        let err = unsubscribe(&state, &a, &b.id()).await.unwrap_err();
        assert!(matches!(err, Error::NotSubscribed { .. }));
        assert!(
            state
                .storage
                .subscription(&b.id(), &a.id())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn bad_targets() {
        let (state, _) = state();
        let a = add_profile(&state, "09131111111").await;

        let err = subscribe(&state, &a, &a.id()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRelationship);
        assert_eq!(format!("{err}"), "cannot follow yourself");

        let err = subscribe(&state, &a, &ProfileId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = unsubscribe(&state, &a, &ProfileId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NoSuchProfile { .. }));
    }

    #[tokio::test]
    async fn invalidation() {
        let (state, cache) = state();
        let a = add_profile(&state, "09131111111").await;
        let b = add_profile(&state, "09131111112").await;
        let c = add_profile(&state, "09131111113").await;

        for key in [
            followings_key(&a.id()),
            followers_key(&b.id()),
            followers_key(&a.id()),
            followings_key(&b.id()),
            followers_key(&c.id()),
        ] {
            cache.set(&key, vec![0x90], None).await.unwrap();
        }

        subscribe(&state, &a, &b.id()).await.unwrap();

        // Exactly the two affected entries are gone
        assert!(cache.get(&followings_key(&a.id())).await.unwrap().is_none());
        assert!(cache.get(&followers_key(&b.id())).await.unwrap().is_none());
        assert!(cache.get(&followers_key(&a.id())).await.unwrap().is_some());
        assert!(cache.get(&followings_key(&b.id())).await.unwrap().is_some());
        assert!(cache.get(&followers_key(&c.id())).await.unwrap().is_some());

        cache
            .set(&followers_key(&b.id()), vec![0x90], None)
            .await
            .unwrap();
        unsubscribe(&state, &a, &b.id()).await.unwrap();
        assert!(cache.get(&followers_key(&b.id())).await.unwrap().is_none());
    }
}
