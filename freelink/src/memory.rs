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

//! # memory
//!
//! An in-memory [Backend] implementation.
//!
//! Everything lives in one [State] behind a single [tokio::sync::RwLock]. That's as coarse as it
//! gets, but it makes staging trivial: a [Staged] subscription change just holds the write guard,
//! so nobody can observe the store between validation & commit.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use itertools::Itertools;
use snafu::prelude::*;
use tap::Pipe;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

use crate::{
    entities::{
        Category, CategoryId, Comment, CommentId, PhoneNumber, Portfolio, PortfolioId, Profile,
        ProfileId, ProfileSummary, Skill, SkillId, Slug, Subscription, User, UserId,
    },
    storage::{
        Backend, CategoryExistsSnafu, DuplicateSubscriptionSnafu, NotSubscribedSnafu,
        PhoneNumberClaimedSnafu, PortfolioExistsSnafu, Result, SelfSubscriptionSnafu,
        SkillAlreadySelectedSnafu, SkillExistsSnafu, Staged, UnknownCategorySnafu,
        UnknownPortfolioSnafu, UnknownProfileSnafu,
    },
};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    phones: HashMap<PhoneNumber, UserId>,
    profiles: HashMap<ProfileId, Profile>,
    profiles_by_user: HashMap<UserId, ProfileId>,
    subscriptions: HashMap<(ProfileId, ProfileId), Subscription>,
    categories: HashMap<CategoryId, Category>,
    skills: HashMap<SkillId, Skill>,
    profile_skills: HashSet<(ProfileId, SkillId)>,
    portfolios: HashMap<PortfolioId, Portfolio>,
    comments: HashMap<CommentId, Comment>,
}

impl State {
    /// Project the edges selected by `pred` onto summaries of the profile at the `other` end
    fn summaries<P, O>(&self, pred: P, other: O) -> Vec<ProfileSummary>
    where
        P: Fn(&Subscription) -> bool,
        O: Fn(&Subscription) -> ProfileId,
    {
        self.subscriptions
            .values()
            .filter(|sub| pred(sub))
            .filter_map(|sub| {
                self.profiles
                    .get(&other(sub))
                    .map(|profile| profile.summarize(sub.created))
            })
            .sorted_by(|lhs, rhs| (lhs.since, lhs.id).cmp(&(rhs.since, rhs.id)))
            .collect()
    }
}

/// In-memory freelink storage
///
/// Cheaply clonable; clones share state.
#[derive(Clone, Debug, Default)]
pub struct InMemory {
    state: Arc<RwLock<State>>,
}

impl InMemory {
    pub fn new() -> InMemory {
        InMemory::default()
    }
}

#[derive(Debug)]
enum Pending {
    Insert(Subscription),
    Remove(ProfileId, ProfileId),
}

/// A subscription change held under the store's write lock
struct StagedChange {
    guard: OwnedRwLockWriteGuard<State>,
    pending: Pending,
}

#[async_trait]
impl Staged for StagedChange {
    async fn commit(self: Box<Self>) -> Result<()> {
        let StagedChange { mut guard, pending } = *self;
        debug!("Committing {pending:?}");
        match pending {
            Pending::Insert(sub) => {
                guard.subscriptions.insert((sub.follower, sub.target), sub);
            }
            Pending::Remove(follower, target) => {
                guard.subscriptions.remove(&(follower, target));
            }
        }
        Ok(())
    }
    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Rolling back {:?}", self.pending);
        Ok(())
    }
}

#[async_trait]
impl Backend for InMemory {
    async fn add_user(&self, user: &User, profile: &Profile) -> Result<()> {
        let mut state = self.state.write().await;
        ensure!(
            !state.phones.contains_key(&user.phone),
            PhoneNumberClaimedSnafu {
                phone: user.phone.clone()
            }
        );
        state.phones.insert(user.phone.clone(), user.id);
        state.users.insert(user.id, user.clone());
        state.profiles_by_user.insert(user.id, profile.id);
        state.profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn user_for_phone(&self, phone: &PhoneNumber) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .phones
            .get(phone)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn activate_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.state.write().await.users.get_mut(id).map(|user| {
            user.active = true;
            user.clone()
        }))
    }

    async fn profile_for_id(&self, id: &ProfileId) -> Result<Option<Profile>> {
        Ok(self.state.read().await.profiles.get(id).cloned())
    }

    async fn profile_for_user(&self, id: &UserId) -> Result<Option<Profile>> {
        let state = self.state.read().await;
        Ok(state
            .profiles_by_user
            .get(id)
            .and_then(|id| state.profiles.get(id))
            .cloned())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<()> {
        let mut state = self.state.write().await;
        let current = state
            .profiles
            .get_mut(&profile.id)
            .context(UnknownProfileSnafu { id: profile.id })?;
        current.email = profile.email.clone();
        current.bio = profile.bio.clone();
        current.age = profile.age;
        current.sex = profile.sex;
        current.city = profile.city.clone();
        Ok(())
    }

    async fn increment_profile_views(&self, id: &ProfileId) -> Result<Option<Profile>> {
        Ok(self.state.write().await.profiles.get_mut(id).map(|p| {
            p.views += 1;
            p.clone()
        }))
    }

    async fn profiles_by_score(&self) -> Result<Vec<Profile>> {
        Ok(self
            .state
            .read()
            .await
            .profiles
            .values()
            .sorted_by(|lhs, rhs| rhs.score.cmp(&lhs.score).then(lhs.id.cmp(&rhs.id)))
            .cloned()
            .collect())
    }

    async fn stage_subscription(&self, sub: &Subscription) -> Result<Box<dyn Staged>> {
        let guard = self.state.clone().write_owned().await;
        ensure!(sub.follower != sub.target, SelfSubscriptionSnafu);
        ensure!(
            guard.profiles.contains_key(&sub.follower),
            UnknownProfileSnafu { id: sub.follower }
        );
        ensure!(
            guard.profiles.contains_key(&sub.target),
            UnknownProfileSnafu { id: sub.target }
        );
        ensure!(
            !guard.subscriptions.contains_key(&(sub.follower, sub.target)),
            DuplicateSubscriptionSnafu {
                follower: sub.follower,
                target: sub.target,
            }
        );
        Ok(Box::new(StagedChange {
            guard,
            pending: Pending::Insert(sub.clone()),
        }))
    }

    async fn stage_unsubscription(
        &self,
        follower: &ProfileId,
        target: &ProfileId,
    ) -> Result<(Subscription, Box<dyn Staged>)> {
        let guard = self.state.clone().write_owned().await;
        let sub = guard
            .subscriptions
            .get(&(*follower, *target))
            .cloned()
            .context(NotSubscribedSnafu {
                follower: *follower,
                target: *target,
            })?;
        let staged: Box<dyn Staged> = Box::new(StagedChange {
            guard,
            pending: Pending::Remove(*follower, *target),
        });
        Ok((sub, staged))
    }

    async fn subscription(
        &self,
        follower: &ProfileId,
        target: &ProfileId,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(&(*follower, *target))
            .cloned())
    }

    async fn followers(&self, target: &ProfileId) -> Result<Vec<ProfileSummary>> {
        Ok(self
            .state
            .read()
            .await
            .summaries(|sub| sub.target == *target, |sub| sub.follower))
    }

    async fn followings(&self, follower: &ProfileId) -> Result<Vec<ProfileSummary>> {
        Ok(self
            .state
            .read()
            .await
            .summaries(|sub| sub.follower == *follower, |sub| sub.target))
    }

    async fn add_category(&self, category: &Category) -> Result<()> {
        let mut state = self.state.write().await;
        ensure!(
            !state.categories.values().any(|c| c.slug == category.slug),
            CategoryExistsSnafu {
                slug: category.slug.clone()
            }
        );
        state.categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn category_for_slug(&self, slug: &Slug) -> Result<Option<Category>> {
        Ok(self
            .state
            .read()
            .await
            .categories
            .values()
            .find(|c| c.slug == *slug)
            .cloned())
    }

    async fn category_for_name(&self, name: &str) -> Result<Option<Category>> {
        Ok(self
            .state
            .read()
            .await
            .categories
            .values()
            .find(|c| c.name.as_ref() == name)
            .cloned())
    }

    async fn set_category_published(&self, slug: &Slug, published: bool) -> Result<bool> {
        Ok(self
            .state
            .write()
            .await
            .categories
            .values_mut()
            .find(|c| c.slug == *slug)
            .map(|c| c.published = published)
            .is_some())
    }

    async fn categories(&self, published_only: bool) -> Result<Vec<Category>> {
        Ok(self
            .state
            .read()
            .await
            .categories
            .values()
            .filter(|c| !published_only || c.published)
            .sorted_by(|lhs, rhs| (&lhs.name, lhs.id).cmp(&(&rhs.name, rhs.id)))
            .cloned()
            .collect())
    }

    async fn add_skill(&self, skill: &Skill) -> Result<()> {
        let mut state = self.state.write().await;
        ensure!(
            state.categories.contains_key(&skill.category),
            UnknownCategorySnafu { id: skill.category }
        );
        ensure!(
            !state.skills.values().any(|s| s.slug == skill.slug),
            SkillExistsSnafu {
                slug: skill.slug.clone()
            }
        );
        state.skills.insert(skill.id, skill.clone());
        Ok(())
    }

    async fn skill_for_slug(&self, slug: &Slug) -> Result<Option<Skill>> {
        Ok(self
            .state
            .read()
            .await
            .skills
            .values()
            .find(|s| s.slug == *slug)
            .cloned())
    }

    async fn set_skill_published(&self, slug: &Slug, published: bool) -> Result<bool> {
        Ok(self
            .state
            .write()
            .await
            .skills
            .values_mut()
            .find(|s| s.slug == *slug)
            .map(|s| s.published = published)
            .is_some())
    }

    async fn skills(
        &self,
        category: Option<&CategoryId>,
        published_only: bool,
    ) -> Result<Vec<Skill>> {
        Ok(self
            .state
            .read()
            .await
            .skills
            .values()
            .filter(|s| !published_only || s.published)
            .filter(|s| category.is_none_or(|id| s.category == *id))
            .sorted_by(|lhs, rhs| (&lhs.name, lhs.id).cmp(&(&rhs.name, rhs.id)))
            .cloned()
            .collect())
    }

    async fn add_profile_skill(&self, profile: &ProfileId, skill: &SkillId) -> Result<()> {
        let mut state = self.state.write().await;
        ensure!(
            state.profiles.contains_key(profile),
            UnknownProfileSnafu { id: *profile }
        );
        ensure!(
            state.profile_skills.insert((*profile, *skill)),
            SkillAlreadySelectedSnafu {
                profile: *profile,
                skill: *skill,
            }
        );
        Ok(())
    }

    async fn skills_for_profile(&self, profile: &ProfileId) -> Result<Vec<Skill>> {
        let state = self.state.read().await;
        state
            .profile_skills
            .iter()
            .filter(|(p, _)| p == profile)
            .filter_map(|(_, s)| state.skills.get(s))
            .sorted_by(|lhs, rhs| (&lhs.name, lhs.id).cmp(&(&rhs.name, rhs.id)))
            .cloned()
            .collect::<Vec<_>>()
            .pipe(Ok)
    }

    async fn add_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        let mut state = self.state.write().await;
        ensure!(
            state.profiles.contains_key(&portfolio.profile),
            UnknownProfileSnafu {
                id: portfolio.profile
            }
        );
        ensure!(
            !state.portfolios.values().any(|p| p.slug == portfolio.slug),
            PortfolioExistsSnafu {
                slug: portfolio.slug.clone()
            }
        );
        state.portfolios.insert(portfolio.id, portfolio.clone());
        Ok(())
    }

    async fn portfolio_for_slug(&self, slug: &Slug) -> Result<Option<Portfolio>> {
        Ok(self
            .state
            .read()
            .await
            .portfolios
            .values()
            .find(|p| p.slug == *slug)
            .cloned())
    }

    async fn increment_portfolio_views(&self, slug: &Slug) -> Result<Option<Portfolio>> {
        Ok(self
            .state
            .write()
            .await
            .portfolios
            .values_mut()
            .find(|p| p.slug == *slug)
            .map(|p| {
                p.views += 1;
                p.clone()
            }))
    }

    async fn set_portfolio_published(&self, id: &PortfolioId, published: bool) -> Result<()> {
        self.state
            .write()
            .await
            .portfolios
            .get_mut(id)
            .context(UnknownPortfolioSnafu { id: *id })?
            .published = published;
        Ok(())
    }

    async fn delete_portfolio(&self, id: &PortfolioId) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .portfolios
            .remove(id)
            .context(UnknownPortfolioSnafu { id: *id })?;
        state.comments.retain(|_, c| c.portfolio != *id);
        Ok(())
    }

    async fn portfolios_for_profile(&self, profile: &ProfileId) -> Result<Vec<Portfolio>> {
        Ok(self
            .state
            .read()
            .await
            .portfolios
            .values()
            .filter(|p| p.profile == *profile)
            .sorted_by(|lhs, rhs| (lhs.created, lhs.id).cmp(&(rhs.created, rhs.id)))
            .cloned()
            .collect())
    }

    async fn add_comment(&self, comment: &Comment) -> Result<()> {
        let mut state = self.state.write().await;
        ensure!(
            state.portfolios.contains_key(&comment.portfolio),
            UnknownPortfolioSnafu {
                id: comment.portfolio
            }
        );
        state.comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn comment_for_id(&self, id: &CommentId) -> Result<Option<Comment>> {
        Ok(self.state.read().await.comments.get(id).cloned())
    }

    async fn comments_for_portfolio(&self, portfolio: &PortfolioId) -> Result<Vec<Comment>> {
        self.state
            .read()
            .await
            .comments
            .values()
            .filter(|c| c.portfolio == *portfolio)
            .sorted_by(|lhs, rhs| (lhs.created, lhs.id).cmp(&(rhs.created, rhs.id)))
            .cloned()
            .collect::<Vec<_>>()
            .pipe(Ok)
    }

    async fn delete_comment(&self, id: &CommentId) -> Result<()> {
        self.state.write().await.comments.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{entities::Name, storage::Error};

    async fn add_profile(storage: &InMemory, phone: &str) -> Profile {
        let user = User::new(&PhoneNumber::new(phone).unwrap());
        let profile = Profile::new(&user.id(), None);
        storage.add_user(&user, &profile).await.unwrap();
        profile
    }

    #[tokio::test]
    async fn users() {
        let storage = InMemory::new();
        let phone = PhoneNumber::new("09131111111").unwrap();
        let user = User::new(&phone);
        let profile = Profile::new(&user.id(), None);
        storage.add_user(&user, &profile).await.unwrap();

        let other = User::new(&phone);
        assert!(matches!(
            storage
                .add_user(&other, &Profile::new(&other.id(), None))
                .await,
            Err(Error::PhoneNumberClaimed { .. })
        ));
        assert!(storage.user_for_id(&other.id()).await.unwrap().is_none());

        assert_eq!(
            storage.user_for_phone(&phone).await.unwrap().unwrap().id(),
            user.id()
        );
        assert!(storage.activate_user(&user.id()).await.unwrap().unwrap().is_active());
        assert_eq!(
            storage.profile_for_user(&user.id()).await.unwrap().unwrap(),
            profile
        );
        assert_eq!(
            storage
                .increment_profile_views(&profile.id())
                .await
                .unwrap()
                .unwrap()
                .views(),
            1
        );
    }

    #[tokio::test]
    async fn staged_subscriptions() {
        let storage = InMemory::new();
        let a = add_profile(&storage, "09131111111").await;
        let b = add_profile(&storage, "09131111112").await;

        let sub = Subscription::new(&a.id(), &b.id()).unwrap();

        // Dropping a staged change abandons it
        let staged = storage.stage_subscription(&sub).await.unwrap();
        drop(staged);
        assert!(storage.subscription(&a.id(), &b.id()).await.unwrap().is_none());

        // As does rolling it back
        let staged = storage.stage_subscription(&sub).await.unwrap();
        staged.rollback().await.unwrap();
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
            Err(Error::DuplicateSubscription { .. })
        ));

        let followers = storage.followers(&b.id()).await.unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].id, a.id());
        assert_eq!(followers[0].since, sub.created());
        assert!(storage.followings(&b.id()).await.unwrap().is_empty());

        let (removed, staged) = storage
            .stage_unsubscription(&a.id(), &b.id())
            .await
            .unwrap();
        assert_eq!(removed, sub);
        staged.commit().await.unwrap();
        assert!(storage.followers(&b.id()).await.unwrap().is_empty());
        assert!(matches!(
            storage.stage_unsubscription(&a.id(), &b.id()).await,
            Err(Error::NotSubscribed { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_profiles() {
        let storage = InMemory::new();
        let a = add_profile(&storage, "09131111111").await;
        let sub = Subscription::new(&a.id(), &ProfileId::new()).unwrap();
        assert!(matches!(
            storage.stage_subscription(&sub).await,
            Err(Error::UnknownProfile { .. })
        ));
    }

    #[tokio::test]
    async fn taxonomy() {
        let storage = InMemory::new();
        let backend = Category::new(&Name::new("Backend Development").unwrap()).unwrap();
        storage.add_category(&backend).await.unwrap();
        assert!(matches!(
            storage
                .add_category(&Category::new(&Name::new("backend development").unwrap()).unwrap())
                .await,
            Err(Error::CategoryExists { .. })
        ));
        assert!(storage.categories(true).await.unwrap().is_empty());
        assert!(
            storage
                .set_category_published(backend.slug(), true)
                .await
                .unwrap()
        );
        assert_eq!(storage.categories(true).await.unwrap().len(), 1);

        let orphan = Skill::new(&Name::new("Django").unwrap(), &CategoryId::new()).unwrap();
        assert!(matches!(
            storage.add_skill(&orphan).await,
            Err(Error::UnknownCategory { .. })
        ));
        let django = Skill::new(&Name::new("Django").unwrap(), &backend.id()).unwrap();
        storage.add_skill(&django).await.unwrap();
        assert!(storage.skills(None, true).await.unwrap().is_empty());
        assert_eq!(
            storage
                .skills(Some(&backend.id()), false)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
