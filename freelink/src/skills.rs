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

//! # Skills
//!
//! Maintenance of the skill taxonomy: categories, & the skills within them. Every operation here is
//! reserved to administrators.
//!
//! New categories & skills start-out unpublished; until published they're invisible to the
//! selectors (and can't be selected by freelancers). The list of published category names is kept
//! in the cache under [category_choices_key]; publishing or unpublishing a category deletes it
//! (under the invalidation fence), & the next read of [category_choices] recomputes it.
//!
//! [category_choices]: crate::selectors::category_choices

use snafu::{Backtrace, IntoError, prelude::*};
use tracing::info;

use crate::{
    entities::{self, Category, Name, Skill, Slug, User, UserId},
    freelink::{ErrorKind, Freelink},
    keys::category_choices_key,
    storage,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{name} doesn't make for a usable slug: {source}"))]
    BadName { name: Name, source: entities::Error },
    #[snafu(display("Cache error: {source}"))]
    Cache { source: freelink_cache::Error },
    #[snafu(display("A category named like {slug} already exists"))]
    CategoryExists { slug: Slug, backtrace: Backtrace },
    #[snafu(display("User {user} is not an administrator"))]
    NotAdmin { user: UserId, backtrace: Backtrace },
    #[snafu(display("There is no category with the given slug."))]
    NoSuchCategory { slug: Slug, backtrace: Backtrace },
    #[snafu(display("There is no skill with the given slug."))]
    NoSuchSkill { slug: Slug, backtrace: Backtrace },
    #[snafu(display("A skill named like {slug} already exists"))]
    SkillExists { slug: Slug, backtrace: Backtrace },
    #[snafu(display("Storage error: {source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadName { .. } => ErrorKind::Invalid,
            Error::CategoryExists { .. } | Error::SkillExists { .. } => ErrorKind::Conflict,
            Error::NotAdmin { .. } => ErrorKind::Forbidden,
            Error::NoSuchCategory { .. } | Error::NoSuchSkill { .. } => ErrorKind::NotFound,
            Error::Cache { .. } | Error::Storage { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////

fn check_admin(user: &User) -> Result<()> {
    ensure!(user.is_admin(), NotAdminSnafu { user: user.id() });
    Ok(())
}

async fn category_for_slug(state: &Freelink, slug: &Slug) -> Result<Category> {
    state
        .storage
        .category_for_slug(slug)
        .await
        .context(StorageSnafu)?
        .context(NoSuchCategorySnafu { slug: slug.clone() })
}

pub async fn create_category(state: &Freelink, admin: &User, name: &Name) -> Result<Category> {
    check_admin(admin)?;
    let category = Category::new(name).context(BadNameSnafu { name: name.clone() })?;
    state
        .storage
        .add_category(&category)
        .await
        .map_err(|err| match err {
            storage::Error::CategoryExists { slug, .. } => CategoryExistsSnafu { slug }.build(),
            err => StorageSnafu.into_error(err),
        })?;
    info!("Created category {}", category.slug());
    Ok(category)
}

/// Create a skill named `name` in the category with slug `category`
pub async fn create_skill(
    state: &Freelink,
    admin: &User,
    name: &Name,
    category: &Slug,
) -> Result<Skill> {
    check_admin(admin)?;
    let category = category_for_slug(state, category).await?;
    let skill = Skill::new(name, &category.id()).context(BadNameSnafu { name: name.clone() })?;
    state
        .storage
        .add_skill(&skill)
        .await
        .map_err(|err| match err {
            storage::Error::SkillExists { slug, .. } => SkillExistsSnafu { slug }.build(),
            storage::Error::UnknownCategory { .. } => NoSuchCategorySnafu {
                slug: category.slug().clone(),
            }
            .build(),
            err => StorageSnafu.into_error(err),
        })?;
    info!("Created skill {} in {}", skill.slug(), category.slug());
    Ok(skill)
}

async fn set_category_published(
    state: &Freelink,
    admin: &User,
    slug: &Slug,
    published: bool,
) -> Result<()> {
    check_admin(admin)?;
    let _fence = state.invalidation.write().await;
    ensure!(
        state
            .storage
            .set_category_published(slug, published)
            .await
            .context(StorageSnafu)?,
        NoSuchCategorySnafu { slug: slug.clone() }
    );
    info!("Category {slug} published: {published}");
    state
        .cache
        .delete(&category_choices_key())
        .await
        .context(CacheSnafu)
}

pub async fn publish_category(state: &Freelink, admin: &User, slug: &Slug) -> Result<()> {
    set_category_published(state, admin, slug, true).await
}

pub async fn unpublish_category(state: &Freelink, admin: &User, slug: &Slug) -> Result<()> {
    set_category_published(state, admin, slug, false).await
}

async fn set_skill_published(
    state: &Freelink,
    admin: &User,
    slug: &Slug,
    published: bool,
) -> Result<()> {
    check_admin(admin)?;
    ensure!(
        state
            .storage
            .set_skill_published(slug, published)
            .await
            .context(StorageSnafu)?,
        NoSuchSkillSnafu { slug: slug.clone() }
    );
    info!("Skill {slug} published: {published}");
    Ok(())
}

pub async fn publish_skill(state: &Freelink, admin: &User, slug: &Slug) -> Result<()> {
    set_skill_published(state, admin, slug, true).await
}

pub async fn unpublish_skill(state: &Freelink, admin: &User, slug: &Slug) -> Result<()> {
    set_skill_published(state, admin, slug, false).await
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;

    use freelink_cache::{MemoryCache, get_value};

    use crate::{entities::PhoneNumber, memory::InMemory, otp::LogSender, selectors};

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
    async fn admins_only() {
        let (state, _) = state();
        let user = User::new(&PhoneNumber::new("09131111111").unwrap());
        let err = create_category(&state, &user, &Name::new("Backend").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = publish_skill(&state, &user, &Slug::new("django").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAdmin { .. }));
    }

    #[tokio::test]
    async fn category_choices_follow_publication() {
        let (state, cache) = state();
        let admin = User::new_admin(&PhoneNumber::new("09131111111").unwrap());
        let backend = create_category(&state, &admin, &Name::new("Backend Development").unwrap())
            .await
            .unwrap();
        assert_eq!(backend.slug().as_ref(), "backend-development");
        assert!(matches!(
            create_category(&state, &admin, &Name::new("backend  development").unwrap()).await,
            Err(Error::CategoryExists { .. })
        ));
        let design = create_category(&state, &admin, &Name::new("Design").unwrap())
            .await
            .unwrap();

        assert!(selectors::category_choices(&state).await.unwrap().is_empty());
        publish_category(&state, &admin, backend.slug()).await.unwrap();
        publish_category(&state, &admin, design.slug()).await.unwrap();
        // Publication drops the cached list rather than rewriting it
        assert!(
            get_value::<Vec<String>>(&cache, &category_choices_key())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            selectors::category_choices(&state).await.unwrap(),
            vec!["Backend Development".to_owned(), "Design".to_owned()]
        );
        assert!(
            get_value::<Vec<String>>(&cache, &category_choices_key())
                .await
                .unwrap()
                .is_some()
        );
        unpublish_category(&state, &admin, backend.slug())
            .await
            .unwrap();
        assert_eq!(
            selectors::category_choices(&state).await.unwrap(),
            vec!["Design".to_owned()]
        );

        let err = publish_category(&state, &admin, &Slug::new("nope").unwrap())
            .await
            .unwrap_err();
        assert_eq!(format!("{err}"), "There is no category with the given slug.");
    }

    #[tokio::test]
    async fn skills() {
        let (state, _) = state();
        let admin = User::new_admin(&PhoneNumber::new("09131111111").unwrap());
        let err = create_skill(
            &state,
            &admin,
            &Name::new("Django").unwrap(),
            &Slug::new("backend").unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoSuchCategory { .. }));

        let backend = create_category(&state, &admin, &Name::new("Backend").unwrap())
            .await
            .unwrap();
        let django = create_skill(&state, &admin, &Name::new("Django").unwrap(), backend.slug())
            .await
            .unwrap();
        assert!(!django.is_published());
        assert!(matches!(
            create_skill(&state, &admin, &Name::new("django").unwrap(), backend.slug()).await,
            Err(Error::SkillExists { .. })
        ));

        publish_skill(&state, &admin, django.slug()).await.unwrap();
        assert_eq!(selectors::skills(&state, None).await.unwrap().len(), 1);
        unpublish_skill(&state, &admin, django.slug()).await.unwrap();
        assert!(selectors::skills(&state, None).await.unwrap().is_empty());
        assert!(matches!(
            publish_skill(&state, &admin, &Slug::new("flask").unwrap()).await,
            Err(Error::NoSuchSkill { .. })
        ));
    }
}
