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

//! Integration tests for the skill taxonomy

use std::time::Duration;

use libtest_mimic::Failed;

use freelink::{
    entities::{Name, Skill, Slug},
    freelink::ErrorKind,
    keys::{category_choices_key, skills_key},
    selectors::{categories, category_choices, my_skills, skills},
    skills::{
        Error, create_category, create_skill, publish_category, publish_skill, unpublish_category,
        unpublish_skill,
    },
    users::{self, select_skill},
};
use freelink_cache::get_value;

use crate::{Harness, Storage};

/// Only administrators may curate the taxonomy
pub async fn admins_only(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (user, _) = harness.freelancer("09131111111").await?;
    let admin = harness.admin("09130000000").await?;

    let err = match create_category(&harness.state, &user, &Name::new("Backend")?).await {
        Ok(_) => return Err("a freelancer created a category".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::NotAdmin { .. }));
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let category = create_category(&harness.state, &admin, &Name::new("Backend")?).await?;
    assert!(!category.is_published());
    assert!(publish_category(&harness.state, &user, category.slug()).await.is_err());
    assert!(
        create_skill(&harness.state, &user, &Name::new("Django")?, category.slug())
            .await
            .is_err()
    );

    let err = match create_category(&harness.state, &admin, &Name::new("backend")?).await {
        Ok(_) => return Err("two categories share a slug".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::CategoryExists { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    Ok(())
}

/// The cached list of category names follows publication
pub async fn category_choices_follow_publication(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let admin = harness.admin("09130000000").await?;
    let backend = create_category(&harness.state, &admin, &Name::new("Backend")?).await?;
    let design = create_category(&harness.state, &admin, &Name::new("UI Design")?).await?;
    assert_eq!(design.slug(), &Slug::new("ui-design")?);

    assert!(category_choices(&harness.state).await?.is_empty());

    publish_category(&harness.state, &admin, backend.slug()).await?;
    publish_category(&harness.state, &admin, design.slug()).await?;
    assert!(
        get_value::<Vec<String>>(&harness.cache, &category_choices_key())
            .await?
            .is_none()
    );
    assert_eq!(
        category_choices(&harness.state).await?,
        vec!["Backend", "UI Design"]
    );
    assert_eq!(
        get_value::<Vec<String>>(&harness.cache, &category_choices_key()).await?,
        Some(vec!["Backend".to_owned(), "UI Design".to_owned()])
    );

    unpublish_category(&harness.state, &admin, backend.slug()).await?;
    assert_eq!(category_choices(&harness.state).await?, vec!["UI Design"]);
    assert_eq!(
        categories(&harness.state, None)
            .await?
            .iter()
            .map(|c| c.slug().clone())
            .collect::<Vec<_>>(),
        vec![design.slug().clone()]
    );

    let err = match publish_category(&harness.state, &admin, &Slug::new("marketing")?).await {
        Ok(_) => return Err("published a category that doesn't exist".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

/// Selecting a skill invalidates the profile's cached skill list
pub async fn skill_selection(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let admin = harness.admin("09130000000").await?;
    let (_, profile) = harness.freelancer("09131111111").await?;

    let backend = create_category(&harness.state, &admin, &Name::new("Backend")?).await?;
    publish_category(&harness.state, &admin, backend.slug()).await?;
    let django = create_skill(&harness.state, &admin, &Name::new("Django")?, backend.slug()).await?;
    let rust = create_skill(&harness.state, &admin, &Name::new("Rust")?, backend.slug()).await?;
    publish_skill(&harness.state, &admin, django.slug()).await?;

    // Unpublished skills can't be listed or selected
    assert_eq!(
        skills(&harness.state, Some(backend.slug()))
            .await?
            .iter()
            .map(Skill::id)
            .collect::<Vec<_>>(),
        vec![django.id()]
    );
    let err = match select_skill(&harness.state, &profile, rust.slug()).await {
        Ok(_) => return Err("selected an unpublished skill".into()),
        Err(err) => err,
    };
    assert!(matches!(err, users::Error::NoSuchSkill { .. }));

    assert!(my_skills(&harness.state, &profile).await?.is_empty());
    assert!(
        get_value::<Vec<Skill>>(&harness.cache, &skills_key(&profile.id()))
            .await?
            .is_some()
    );

    select_skill(&harness.state, &profile, django.slug()).await?;
    assert!(
        get_value::<Vec<Skill>>(&harness.cache, &skills_key(&profile.id()))
            .await?
            .is_none()
    );
    let mine = my_skills(&harness.state, &profile).await?;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].slug(), django.slug());

    let err = match select_skill(&harness.state, &profile, django.slug()).await {
        Ok(_) => return Err("selected a skill twice".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Withdrawing a skill hides it from the listing, but not from those who already chose it
    unpublish_skill(&harness.state, &admin, django.slug()).await?;
    assert!(skills(&harness.state, None).await?.is_empty());
    assert_eq!(my_skills(&harness.state, &profile).await?.len(), 1);
    Ok(())
}

/// Publishing a category can't be undone by a reader caching the names it read beforehand
pub async fn category_choices_racing_publication(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let admin = harness.admin("09130000000").await?;
    let backend = create_category(&harness.state, &admin, &Name::new("Backend")?).await?;

    harness.cache.hold_sets(true);
    let reader = {
        let state = harness.state.clone();
        tokio::spawn(async move { category_choices(&state).await })
    };
    harness.cache.set_parked().await;
    harness.cache.hold_sets(false);

    let writer = {
        let state = harness.state.clone();
        let admin = admin.clone();
        let slug = backend.slug().clone();
        tokio::spawn(async move { publish_category(&state, &admin, &slug).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        !writer.is_finished(),
        "publication finished while a reader was populating the category names"
    );

    harness.cache.release_set();
    assert!(reader.await??.is_empty());
    writer.await??;
    assert_eq!(category_choices(&harness.state).await?, vec!["Backend"]);
    Ok(())
}
