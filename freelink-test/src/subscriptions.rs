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

//! Integration tests for the subscription graph & the caching in front of it

use std::{collections::HashSet, time::Duration};

use futures::future::join_all;
use libtest_mimic::Failed;

use freelink::{
    entities::{ProfileId, ProfileSummary, Subscription},
    freelink::ErrorKind,
    keys::followers_key,
    selectors::{my_followers, my_followings},
    subscriptions::{Error, subscribe, unsubscribe},
};
use freelink_cache::get_value;

use crate::{Harness, Storage};

fn ids(summaries: &[ProfileSummary]) -> HashSet<ProfileId> {
    summaries.iter().map(|s| s.id).collect()
}

/// No profile may follow itself
pub async fn self_subscription(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, p) = harness.freelancer("09130000001").await?;
    let err = match subscribe(&harness.state, &p, &p.id()).await {
        Ok(_) => return Err("following oneself succeeded".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::SelfSubscription { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidRelationship);
    assert!(my_followings(&harness.state, &p).await?.is_empty());
    assert!(my_followers(&harness.state, &p).await?.is_empty());
    Ok(())
}

/// Following shows-up on both ends
pub async fn follow_lists(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, p) = harness.freelancer("09130000001").await?;
    let (_, q) = harness.freelancer("09130000002").await?;

    // Prime both caches, so that we know the subscription invalidated them
    assert!(my_followings(&harness.state, &p).await?.is_empty());
    assert!(my_followers(&harness.state, &q).await?.is_empty());

    let sub = subscribe(&harness.state, &p, &q.id()).await?;
    assert_eq!(sub.follower(), p.id());
    assert_eq!(sub.target(), q.id());

    let followings = my_followings(&harness.state, &p).await?;
    assert_eq!(followings.len(), 1);
    assert_eq!(followings[0].id, q.id());
    assert_eq!(followings[0].since, sub.created());

    let followers = my_followers(&harness.state, &q).await?;
    assert_eq!(followers.len(), 1);
    assert_eq!(followers[0].id, p.id());

    // Nothing else moved
    assert!(my_followers(&harness.state, &p).await?.is_empty());
    assert!(my_followings(&harness.state, &q).await?.is_empty());
    Ok(())
}

/// Following twice is a conflict, & leaves exactly one edge
pub async fn duplicate_subscription(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, p) = harness.freelancer("09130000001").await?;
    let (_, q) = harness.freelancer("09130000002").await?;

    subscribe(&harness.state, &p, &q.id()).await?;
    let err = match subscribe(&harness.state, &p, &q.id()).await {
        Ok(_) => return Err("the second subscription succeeded".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::AlreadySubscribed { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(harness.state.storage.followers(&q.id()).await?.len(), 1);
    assert_eq!(my_followers(&harness.state, &q).await?.len(), 1);
    Ok(())
}

/// Unfollowing removes the edge from both lists; unfollowing again fails
pub async fn unsubscribe_twice(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, p) = harness.freelancer("09130000001").await?;
    let (_, q) = harness.freelancer("09130000002").await?;

    subscribe(&harness.state, &p, &q.id()).await?;
    assert_eq!(my_followers(&harness.state, &q).await?.len(), 1);
    assert_eq!(my_followings(&harness.state, &p).await?.len(), 1);

    unsubscribe(&harness.state, &p, &q.id()).await?;
    assert!(my_followers(&harness.state, &q).await?.is_empty());
    assert!(my_followings(&harness.state, &p).await?.is_empty());

    let err = match unsubscribe(&harness.state, &p, &q.id()).await {
        Ok(_) => return Err("the second unsubscription succeeded".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::NotSubscribed { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

/// Naming a profile that doesn't exist
pub async fn unknown_target(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, p) = harness.freelancer("09130000001").await?;
    let nobody = ProfileId::new();

    let err = match subscribe(&harness.state, &p, &nobody).await {
        Ok(_) => return Err("following a non-existent profile succeeded".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::NoSuchProfile { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = match unsubscribe(&harness.state, &p, &nobody).await {
        Ok(_) => return Err("unfollowing a non-existent profile succeeded".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::NoSuchProfile { .. }));
    Ok(())
}

/// Two reads with no intervening mutation agree, & the second comes from the cache
pub async fn idempotent_reads(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, p) = harness.freelancer("09130000001").await?;
    let (_, q) = harness.freelancer("09130000002").await?;
    let (_, r) = harness.freelancer("09130000003").await?;

    subscribe(&harness.state, &p, &q.id()).await?;
    let first = my_followers(&harness.state, &q).await?;
    assert_eq!(
        get_value::<Vec<ProfileSummary>>(&harness.cache, &followers_key(&q.id())).await?,
        Some(first.clone())
    );

    // Go around the service layer, so the cached entry is *not* invalidated: if the second read
    // reflects this edge, it didn't come from the cache.
    harness
        .state
        .storage
        .stage_subscription(&Subscription::new(&r.id(), &q.id())?)
        .await?
        .commit()
        .await?;

    let second = my_followers(&harness.state, &q).await?;
    assert_eq!(first, second);
    assert_eq!(harness.state.storage.followers(&q.id()).await?.len(), 2);
    Ok(())
}

/// A & B follow C; A unfollows
pub async fn scenario_abc(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, a) = harness.freelancer("09130000001").await?;
    let (_, b) = harness.freelancer("09130000002").await?;
    let (_, c) = harness.freelancer("09130000003").await?;

    subscribe(&harness.state, &a, &c.id()).await?;
    subscribe(&harness.state, &b, &c.id()).await?;
    assert_eq!(
        ids(&my_followers(&harness.state, &c).await?),
        HashSet::from([a.id(), b.id()])
    );

    unsubscribe(&harness.state, &a, &c.id()).await?;
    assert_eq!(
        ids(&my_followers(&harness.state, &c).await?),
        HashSet::from([b.id()])
    );
    assert!(my_followings(&harness.state, &a).await?.is_empty());
    assert_eq!(
        ids(&my_followings(&harness.state, &b).await?),
        HashSet::from([c.id()])
    );
    Ok(())
}

/// Followers are listed oldest subscription first
pub async fn follower_order(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, a) = harness.freelancer("09130000001").await?;
    let (_, b) = harness.freelancer("09130000002").await?;
    let (_, c) = harness.freelancer("09130000003").await?;

    subscribe(&harness.state, &b, &c.id()).await?;
    // Timestamps are kept to the microsecond; make sure the edges don't share one
    tokio::time::sleep(Duration::from_millis(2)).await;
    subscribe(&harness.state, &a, &c.id()).await?;

    assert_eq!(
        my_followers(&harness.state, &c)
            .await?
            .iter()
            .map(|s| s.id)
            .collect::<Vec<_>>(),
        vec![b.id(), a.id()]
    );
    Ok(())
}

/// A following B says nothing about B following A
pub async fn directedness(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, a) = harness.freelancer("09130000001").await?;
    let (_, b) = harness.freelancer("09130000002").await?;

    subscribe(&harness.state, &a, &b.id()).await?;
    assert!(my_followings(&harness.state, &b).await?.is_empty());
    subscribe(&harness.state, &b, &a.id()).await?;

    let storage = &harness.state.storage;
    assert!(storage.subscription(&a.id(), &b.id()).await?.is_some());
    assert!(storage.subscription(&b.id(), &a.id()).await?.is_some());

    unsubscribe(&harness.state, &a, &b.id()).await?;
    assert!(storage.subscription(&a.id(), &b.id()).await?.is_none());
    assert!(storage.subscription(&b.id(), &a.id()).await?.is_some());
    assert_eq!(
        ids(&my_followers(&harness.state, &a).await?),
        HashSet::from([b.id()])
    );
    Ok(())
}

/// If the cache can't be invalidated, the store change is rolled back
pub async fn failed_invalidation(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, a) = harness.freelancer("09130000001").await?;
    let (_, b) = harness.freelancer("09130000002").await?;

    harness.cache.fail_deletes(true);
    let err = match subscribe(&harness.state, &a, &b.id()).await {
        Ok(_) => return Err("subscribe succeeded with a broken cache".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::Cache { .. }));
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(
        harness
            .state
            .storage
            .subscription(&a.id(), &b.id())
            .await?
            .is_none()
    );

    // Once the cache recovers, the same request goes through...
    harness.cache.fail_deletes(false);
    subscribe(&harness.state, &a, &b.id()).await?;

    // & the same holds for unsubscribing.
    harness.cache.fail_deletes(true);
    assert!(unsubscribe(&harness.state, &a, &b.id()).await.is_err());
    assert!(
        harness
            .state
            .storage
            .subscription(&a.id(), &b.id())
            .await?
            .is_some()
    );
    harness.cache.fail_deletes(false);
    assert_eq!(my_followers(&harness.state, &b).await?.len(), 1);
    Ok(())
}

/// Reads fall through to the store when the cache is down
pub async fn failed_reads(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, a) = harness.freelancer("09130000001").await?;
    let (_, b) = harness.freelancer("09130000002").await?;
    subscribe(&harness.state, &a, &b.id()).await?;

    harness.cache.fail_gets(true);
    harness.cache.fail_sets(true);
    assert_eq!(
        ids(&my_followers(&harness.state, &b).await?),
        HashSet::from([a.id()])
    );
    assert_eq!(
        ids(&my_followings(&harness.state, &a).await?),
        HashSet::from([b.id()])
    );
    Ok(())
}

/// Racing duplicate subscriptions produce exactly one edge
pub async fn concurrent_subscriptions(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, a) = harness.freelancer("09130000001").await?;
    let (_, b) = harness.freelancer("09130000002").await?;

    let handles = (0..8).map(|_| {
        let state = harness.state.clone();
        let a = a.clone();
        let b = b.id();
        tokio::spawn(async move { subscribe(&state, &a, &b).await })
    });
    let results = join_all(handles)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| matches!(err, Error::AlreadySubscribed { .. }))
    );
    assert_eq!(harness.state.storage.followers(&b.id()).await?.len(), 1);
    assert_eq!(my_followers(&harness.state, &b).await?.len(), 1);
    Ok(())
}

/// A list computed before a subscription can't be cached over that subscription's invalidation
pub async fn populate_racing_subscribe(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, a) = harness.freelancer("09130000001").await?;
    let (_, b) = harness.freelancer("09130000002").await?;

    harness.cache.hold_sets(true);
    let reader = {
        let state = harness.state.clone();
        let b = b.clone();
        tokio::spawn(async move { my_followers(&state, &b).await })
    };
    // The reader has its (empty) list from the store & is about to cache it
    harness.cache.set_parked().await;
    harness.cache.hold_sets(false);

    let writer = {
        let state = harness.state.clone();
        let a = a.clone();
        let b = b.id();
        tokio::spawn(async move { subscribe(&state, &a, &b).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !writer.is_finished(),
        "subscribe finished while a reader was populating the list it stales"
    );

    harness.cache.release_set();
    assert!(reader.await??.is_empty());
    writer.await??;

    assert_eq!(harness.state.storage.followers(&b.id()).await?.len(), 1);
    assert_eq!(
        ids(&my_followers(&harness.state, &b).await?),
        HashSet::from([a.id()])
    );
    Ok(())
}

/// A reader that misses while a change is staged waits for it, & sees the committed state
pub async fn readers_wait_for_staged_changes(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, a) = harness.freelancer("09130000001").await?;
    let (_, b) = harness.freelancer("09130000002").await?;

    let staged = harness
        .state
        .storage
        .stage_subscription(&Subscription::new(&a.id(), &b.id())?)
        .await?;
    let reader = {
        let state = harness.state.clone();
        let b = b.clone();
        tokio::spawn(async move { my_followers(&state, &b).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !reader.is_finished(),
        "a reader finished while a change was staged"
    );

    staged.commit().await?;
    assert_eq!(ids(&reader.await??), HashSet::from([a.id()]));
    assert_eq!(
        get_value::<Vec<ProfileSummary>>(&harness.cache, &followers_key(&b.id()))
            .await?
            .map(|summaries| ids(&summaries)),
        Some(HashSet::from([a.id()]))
    );
    Ok(())
}
