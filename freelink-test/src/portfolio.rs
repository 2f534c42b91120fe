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

//! Integration tests for portfolios & the comments on them

use libtest_mimic::Failed;

use freelink::{
    entities::{CommentText, Description, Name, Slug},
    freelink::ErrorKind,
    portfolio::{
        Error, add_comment, create_portfolio, delete_comment, delete_portfolio,
        publish_portfolio, view_portfolio,
    },
    selectors::{comments, my_portfolios},
};

use crate::{Harness, Storage};

/// Create, view, publish, comment & delete
pub async fn lifecycle(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, owner) = harness.freelancer("09131111111").await?;
    let (_, visitor) = harness.freelancer("09132222222").await?;

    let portfolio = create_portfolio(
        &harness.state,
        &owner,
        &Name::new("Shop Redesign")?,
        Some(Description::new("A storefront, rebuilt")?),
    )
    .await?;
    assert_eq!(portfolio.slug(), &Slug::new("shop-redesign")?);
    assert!(!portfolio.is_published());

    let err = match create_portfolio(&harness.state, &visitor, &Name::new("shop redesign")?, None)
        .await
    {
        Ok(_) => return Err("two portfolios share a slug".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::PortfolioExists { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(view_portfolio(&harness.state, portfolio.slug()).await?.views(), 1);
    assert_eq!(view_portfolio(&harness.state, portfolio.slug()).await?.views(), 2);

    publish_portfolio(&harness.state, &owner, portfolio.slug()).await?;
    let mine = my_portfolios(&harness.state, &owner).await?;
    assert_eq!(mine.len(), 1);
    assert!(mine[0].is_published());
    assert!(my_portfolios(&harness.state, &visitor).await?.is_empty());

    let first = add_comment(
        &harness.state,
        &visitor,
        portfolio.slug(),
        &CommentText::new("Lovely work")?,
    )
    .await?;
    let second = add_comment(
        &harness.state,
        &owner,
        portfolio.slug(),
        &CommentText::new("Thanks!")?,
    )
    .await?;
    let listed = comments(&harness.state, portfolio.slug()).await?;
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first));
    assert!(listed.contains(&second));

    // Comments may only be deleted by their authors
    let err = match delete_comment(&harness.state, &owner, &first.id()).await {
        Ok(_) => return Err("deleted someone else's comment".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::NotOwner { .. }));
    delete_comment(&harness.state, &visitor, &first.id()).await?;
    assert_eq!(comments(&harness.state, portfolio.slug()).await?, vec![second]);

    delete_portfolio(&harness.state, &owner, portfolio.slug()).await?;
    assert!(my_portfolios(&harness.state, &owner).await?.is_empty());
    let err = match view_portfolio(&harness.state, portfolio.slug()).await {
        Ok(_) => return Err("viewed a deleted portfolio".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

/// Only a portfolio's owner may publish or delete it
pub async fn ownership(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (_, owner) = harness.freelancer("09131111111").await?;
    let (_, intruder) = harness.freelancer("09132222222").await?;

    let portfolio =
        create_portfolio(&harness.state, &owner, &Name::new("Logo Pack")?, None).await?;

    for result in [
        publish_portfolio(&harness.state, &intruder, portfolio.slug()).await,
        delete_portfolio(&harness.state, &intruder, portfolio.slug()).await,
    ] {
        let err = match result {
            Ok(_) => return Err("a stranger changed someone's portfolio".into()),
            Err(err) => err,
        };
        assert!(matches!(err, Error::NotOwner { .. }));
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
    assert_eq!(my_portfolios(&harness.state, &owner).await?.len(), 1);
    assert!(!my_portfolios(&harness.state, &owner).await?[0].is_published());

    let err = match add_comment(
        &harness.state,
        &intruder,
        &Slug::new("no-such-thing")?,
        &CommentText::new("hello?")?,
    )
    .await
    {
        Ok(_) => return Err("commented on a portfolio that doesn't exist".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::NoSuchPortfolio { .. }));
    Ok(())
}
