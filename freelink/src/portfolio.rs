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

//! # Portfolios
//!
//! Freelancers showcase past work in portfolios, on which other users may comment. A portfolio is
//! addressed by a slug derived from its title; only its owner may publish or delete it, & only a
//! comment's author may delete the comment.

use snafu::{Backtrace, IntoError, prelude::*};
use tracing::info;

use crate::{
    counter_add,
    entities::{
        self, Comment, CommentId, CommentText, Description, Name, Portfolio, Profile, ProfileId,
        Slug,
    },
    freelink::{ErrorKind, Freelink},
    metrics::{self, Sort},
    storage,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{title} doesn't make for a usable slug: {source}"))]
    BadTitle {
        title: Name,
        source: entities::Error,
    },
    #[snafu(display("There is no comment with the provided id."))]
    NoSuchComment { id: CommentId, backtrace: Backtrace },
    #[snafu(display("There is no portfolio with the provided slug."))]
    NoSuchPortfolio { slug: Slug, backtrace: Backtrace },
    #[snafu(display("Profile {profile} doesn't own this"))]
    NotOwner {
        profile: ProfileId,
        backtrace: Backtrace,
    },
    #[snafu(display("A portfolio with slug {slug} already exists"))]
    PortfolioExists { slug: Slug, backtrace: Backtrace },
    #[snafu(display("Storage error: {source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadTitle { .. } => ErrorKind::Invalid,
            Error::NoSuchComment { .. } | Error::NoSuchPortfolio { .. } => ErrorKind::NotFound,
            Error::NotOwner { .. } => ErrorKind::Forbidden,
            Error::PortfolioExists { .. } => ErrorKind::Conflict,
            Error::Storage { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("portfolio.views", Sort::IntegralCounter) }

async fn portfolio_for_slug(state: &Freelink, slug: &Slug) -> Result<Portfolio> {
    state
        .storage
        .portfolio_for_slug(slug)
        .await
        .context(StorageSnafu)?
        .context(NoSuchPortfolioSnafu { slug: slug.clone() })
}

/// Look-up the portfolio with slug `slug`, insisting that `profile` own it
async fn owned_portfolio(state: &Freelink, profile: &Profile, slug: &Slug) -> Result<Portfolio> {
    let portfolio = portfolio_for_slug(state, slug).await?;
    ensure!(
        portfolio.profile() == profile.id(),
        NotOwnerSnafu {
            profile: profile.id()
        }
    );
    Ok(portfolio)
}

pub async fn create_portfolio(
    state: &Freelink,
    profile: &Profile,
    title: &Name,
    description: Option<Description>,
) -> Result<Portfolio> {
    let portfolio = Portfolio::new(&profile.id(), title, description).context(BadTitleSnafu {
        title: title.clone(),
    })?;
    state
        .storage
        .add_portfolio(&portfolio)
        .await
        .map_err(|err| match err {
            storage::Error::PortfolioExists { slug, .. } => PortfolioExistsSnafu { slug }.build(),
            err => StorageSnafu.into_error(err),
        })?;
    info!("Profile {} created portfolio {}", profile.id(), portfolio.slug());
    Ok(portfolio)
}

/// Fetch a portfolio for display, counting the view
pub async fn view_portfolio(state: &Freelink, slug: &Slug) -> Result<Portfolio> {
    let portfolio = state
        .storage
        .increment_portfolio_views(slug)
        .await
        .context(StorageSnafu)?
        .context(NoSuchPortfolioSnafu { slug: slug.clone() })?;
    counter_add!(state.instruments, "portfolio.views", 1, &[]);
    Ok(portfolio)
}

pub async fn publish_portfolio(state: &Freelink, profile: &Profile, slug: &Slug) -> Result<()> {
    let portfolio = owned_portfolio(state, profile, slug).await?;
    state
        .storage
        .set_portfolio_published(&portfolio.id(), true)
        .await
        .context(StorageSnafu)
}

/// Delete a portfolio along with all its comments
pub async fn delete_portfolio(state: &Freelink, profile: &Profile, slug: &Slug) -> Result<()> {
    let portfolio = owned_portfolio(state, profile, slug).await?;
    state
        .storage
        .delete_portfolio(&portfolio.id())
        .await
        .context(StorageSnafu)?;
    info!("Profile {} deleted portfolio {}", profile.id(), slug);
    Ok(())
}

/// `profile` comments on the portfolio with slug `slug`
pub async fn add_comment(
    state: &Freelink,
    profile: &Profile,
    slug: &Slug,
    text: &CommentText,
) -> Result<Comment> {
    let portfolio = portfolio_for_slug(state, slug).await?;
    let comment = Comment::new(&portfolio.id(), &profile.id(), text);
    state
        .storage
        .add_comment(&comment)
        .await
        .map_err(|err| match err {
            storage::Error::UnknownPortfolio { .. } => {
                NoSuchPortfolioSnafu { slug: slug.clone() }.build()
            }
            err => StorageSnafu.into_error(err),
        })?;
    Ok(comment)
}

pub async fn delete_comment(state: &Freelink, profile: &Profile, id: &CommentId) -> Result<()> {
    let comment = state
        .storage
        .comment_for_id(id)
        .await
        .context(StorageSnafu)?
        .context(NoSuchCommentSnafu { id: *id })?;
    ensure!(
        comment.author() == profile.id(),
        NotOwnerSnafu {
            profile: profile.id()
        }
    );
    state.storage.delete_comment(id).await.context(StorageSnafu)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;

    use freelink_cache::MemoryCache;

    use crate::{
        entities::{PhoneNumber, User},
        memory::InMemory,
        otp::LogSender,
        selectors,
    };

    async fn add_profile(state: &Freelink, phone: &str) -> Profile {
        let user = User::new(&PhoneNumber::new(phone).unwrap());
        let profile = Profile::new(&user.id(), None);
        state.storage.add_user(&user, &profile).await.unwrap();
        profile
    }

    #[tokio::test]
    async fn lifecycle() {
        let state = Freelink::new(
            Arc::new(InMemory::new()),
            Arc::new(MemoryCache::default()),
            Arc::new(LogSender),
        );
        let owner = add_profile(&state, "09131111111").await;
        let other = add_profile(&state, "09131111112").await;

        let portfolio = create_portfolio(
            &state,
            &owner,
            &Name::new("New Portfolio").unwrap(),
            Some(Description::new("Some work").unwrap()),
        )
        .await
        .unwrap();
        assert_eq!(portfolio.slug().as_ref(), "new-portfolio");
        assert!(!portfolio.is_published());
        assert!(matches!(
            create_portfolio(&state, &other, &Name::new("new portfolio").unwrap(), None).await,
            Err(Error::PortfolioExists { .. })
        ));

        assert_eq!(
            view_portfolio(&state, portfolio.slug()).await.unwrap().views(),
            1
        );
        let err = view_portfolio(&state, &Slug::new("old-portfolio").unwrap())
            .await
            .unwrap_err();
        assert_eq!(format!("{err}"), "There is no portfolio with the provided slug.");

        let err = publish_portfolio(&state, &other, portfolio.slug())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        publish_portfolio(&state, &owner, portfolio.slug())
            .await
            .unwrap();
        assert!(
            selectors::my_portfolios(&state, &owner).await.unwrap()[0].is_published()
        );

        let comment = add_comment(
            &state,
            &other,
            portfolio.slug(),
            &CommentText::new("Nice!").unwrap(),
        )
        .await
        .unwrap();
        assert!(matches!(
            delete_comment(&state, &owner, &comment.id()).await,
            Err(Error::NotOwner { .. })
        ));
        assert_eq!(
            selectors::comments(&state, portfolio.slug())
                .await
                .unwrap()
                .len(),
            1
        );

        assert!(matches!(
            delete_portfolio(&state, &other, portfolio.slug()).await,
            Err(Error::NotOwner { .. })
        ));
        delete_portfolio(&state, &owner, portfolio.slug())
            .await
            .unwrap();
        assert!(matches!(
            delete_comment(&state, &other, &comment.id()).await,
            Err(Error::NoSuchComment { .. })
        ));
    }
}
