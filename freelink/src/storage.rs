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

//! # storage
//!
//! Abstractions for the freelink storage layer.
//!
//! ## Staged changes
//!
//! Most [Backend] methods are one-shot: they do their thing & return. Changes to the subscription
//! graph are different, because they come with an obligation to invalidate cached query results
//! *before* the change becomes visible. Were we to commit first & invalidate second, a failure in
//! between would leave a cache that disagrees with the store until someone noticed. Were we to
//! invalidate first & commit second without holding anything, a concurrent reader could
//! re-populate the cache from pre-change state in between.
//!
//! So the subscription methods *stage* their change: they validate it under whatever exclusive
//! access the backend offers (the in-memory backend's write lock, an open SQLite transaction) &
//! hand back a [Staged] handle that keeps holding that access. The caller invalidates, then calls
//! [Staged::commit]; or, if invalidation fails, [Staged::rollback]. Dropping a [Staged] without
//! doing either rolls the change back.

use async_trait::async_trait;
use snafu::{Backtrace, IntoError, prelude::*};

use crate::entities::{
    Category, CategoryId, Comment, CommentId, PhoneNumber, Portfolio, PortfolioId, Profile,
    ProfileId, ProfileSummary, Skill, SkillId, Slug, Subscription, User, UserId,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[snafu(display("A category with slug {slug} already exists"))]
    CategoryExists { slug: Slug, backtrace: Backtrace },
    #[snafu(display("{follower} already follows {target}"))]
    DuplicateSubscription {
        follower: ProfileId,
        target: ProfileId,
        backtrace: Backtrace,
    },
    #[snafu(display("{follower} does not follow {target}"))]
    NotSubscribed {
        follower: ProfileId,
        target: ProfileId,
        backtrace: Backtrace,
    },
    #[snafu(display("The phone number {phone} is already claimed"))]
    PhoneNumberClaimed {
        phone: PhoneNumber,
        backtrace: Backtrace,
    },
    #[snafu(display("A portfolio with slug {slug} already exists"))]
    PortfolioExists { slug: Slug, backtrace: Backtrace },
    #[snafu(display("A profile may not follow itself"))]
    SelfSubscription { backtrace: Backtrace },
    #[snafu(display("Profile {profile} has already selected skill {skill}"))]
    SkillAlreadySelected {
        profile: ProfileId,
        skill: SkillId,
        backtrace: Backtrace,
    },
    #[snafu(display("A skill with slug {slug} already exists"))]
    SkillExists { slug: Slug, backtrace: Backtrace },
    #[snafu(display("No category with id {id}"))]
    UnknownCategory { id: CategoryId, backtrace: Backtrace },
    #[snafu(display("No portfolio with id {id}"))]
    UnknownPortfolio {
        id: PortfolioId,
        backtrace: Backtrace,
    },
    #[snafu(display("No profile with id {id}"))]
    UnknownProfile { id: ProfileId, backtrace: Backtrace },
}

impl Error {
    /// Wrap a backend-specific error
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        BackendSnafu.into_error(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Staged changes                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A validated, but not yet visible, change to the store
///
/// While a [Staged] is alive the backend is held exclusively: other writers, and readers of the
/// affected data, wait. Commit or roll back promptly.
#[async_trait]
pub trait Staged: Send {
    /// Make the change visible
    async fn commit(self: Box<Self>) -> Result<()>;
    /// Abandon the change
    async fn rollback(self: Box<Self>) -> Result<()>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Backend                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The freelink storage interface
///
/// Lookups return `Ok(None)` for "not there"; `Err` is reserved for things going wrong.
///
/// Listings are ordered, so that two backends given the same data return the same answer:
/// subscription lists by edge creation time, ties broken by the other profile's id; categories &
/// skills by name; portfolios & comments by creation time, ties broken by id.
#[async_trait]
pub trait Backend {
    // Users & profiles

    /// Add a new user along with their profile; fail with [Error::PhoneNumberClaimed] if the
    /// phone number is already taken, in which case nothing is written.
    async fn add_user(&self, user: &User, profile: &Profile) -> Result<()>;
    /// Retrieve a [User] given their phone number
    async fn user_for_phone(&self, phone: &PhoneNumber) -> Result<Option<User>>;
    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>>;
    /// Mark a user as active (i.e. their phone number has been verified). Return the updated
    /// user, or `None` if there is no such user.
    async fn activate_user(&self, id: &UserId) -> Result<Option<User>>;
    async fn profile_for_id(&self, id: &ProfileId) -> Result<Option<Profile>>;
    async fn profile_for_user(&self, id: &UserId) -> Result<Option<Profile>>;
    /// Overwrite the user-editable attributes of an existing profile
    async fn update_profile(&self, profile: &Profile) -> Result<()>;
    /// Atomically bump the profile's view counter; return the updated profile
    async fn increment_profile_views(&self, id: &ProfileId) -> Result<Option<Profile>>;
    /// All profiles, by descending score (ties broken by id)
    async fn profiles_by_score(&self) -> Result<Vec<Profile>>;

    // Subscriptions

    /// Stage a new edge
    ///
    /// Fails with [Error::DuplicateSubscription] if the edge exists, [Error::SelfSubscription] if
    /// it's a loop, & [Error::UnknownProfile] if either end doesn't exist.
    async fn stage_subscription(&self, sub: &Subscription) -> Result<Box<dyn Staged>>;
    /// Stage the removal of an edge; fails with [Error::NotSubscribed] if there is no such edge.
    /// On success, return the edge that will be removed along with the handle.
    async fn stage_unsubscription(
        &self,
        follower: &ProfileId,
        target: &ProfileId,
    ) -> Result<(Subscription, Box<dyn Staged>)>;
    async fn subscription(
        &self,
        follower: &ProfileId,
        target: &ProfileId,
    ) -> Result<Option<Subscription>>;
    /// Summaries of the profiles following `target`
    async fn followers(&self, target: &ProfileId) -> Result<Vec<ProfileSummary>>;
    /// Summaries of the profiles `follower` follows
    async fn followings(&self, follower: &ProfileId) -> Result<Vec<ProfileSummary>>;

    // Skill taxonomy

    async fn add_category(&self, category: &Category) -> Result<()>;
    async fn category_for_slug(&self, slug: &Slug) -> Result<Option<Category>>;
    async fn category_for_name(&self, name: &str) -> Result<Option<Category>>;
    /// Return false if there is no category with that slug
    async fn set_category_published(&self, slug: &Slug, published: bool) -> Result<bool>;
    async fn categories(&self, published_only: bool) -> Result<Vec<Category>>;
    async fn add_skill(&self, skill: &Skill) -> Result<()>;
    async fn skill_for_slug(&self, slug: &Slug) -> Result<Option<Skill>>;
    /// Return false if there is no skill with that slug
    async fn set_skill_published(&self, slug: &Slug, published: bool) -> Result<bool>;
    async fn skills(
        &self,
        category: Option<&CategoryId>,
        published_only: bool,
    ) -> Result<Vec<Skill>>;
    /// Fails with [Error::SkillAlreadySelected] if the profile already lists this skill
    async fn add_profile_skill(&self, profile: &ProfileId, skill: &SkillId) -> Result<()>;
    async fn skills_for_profile(&self, profile: &ProfileId) -> Result<Vec<Skill>>;

    // Portfolios & comments

    async fn add_portfolio(&self, portfolio: &Portfolio) -> Result<()>;
    async fn portfolio_for_slug(&self, slug: &Slug) -> Result<Option<Portfolio>>;
    async fn increment_portfolio_views(&self, slug: &Slug) -> Result<Option<Portfolio>>;
    async fn set_portfolio_published(&self, id: &PortfolioId, published: bool) -> Result<()>;
    /// Delete a portfolio & every comment on it
    async fn delete_portfolio(&self, id: &PortfolioId) -> Result<()>;
    async fn portfolios_for_profile(&self, profile: &ProfileId) -> Result<Vec<Portfolio>>;
    async fn add_comment(&self, comment: &Comment) -> Result<()>;
    async fn comment_for_id(&self, id: &CommentId) -> Result<Option<Comment>>;
    async fn comments_for_portfolio(&self, portfolio: &PortfolioId) -> Result<Vec<Comment>>;
    async fn delete_comment(&self, id: &CommentId) -> Result<()>;
}
