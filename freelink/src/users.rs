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

//! # Users
//!
//! Registration, phone verification & profile maintenance.
//!
//! A freelink user signs-up with their phone number (and, optionally, an e-mail address). That
//! creates an *inactive* [User] along with an empty [Profile], and sends a one-time password to the
//! phone. Echoing the code back via [verify] activates the user.
//!
//! One-time passwords live only in the cache, under [otp_key], with a short time-to-live. Unlike
//! the selectors, then, the operations here treat cache failures as failures.

use freelink_cache::{get_value, set_value};
use secrecy::{ExposeSecret, SecretString};
use snafu::{Backtrace, IntoError, prelude::*};
use tracing::{debug, info};

use crate::{
    counter_add,
    entities::{PhoneNumber, Profile, ProfileId, ProfileUpdate, Slug, User, UserEmail, UserId},
    freelink::{ErrorKind, Freelink},
    keys::{otp_key, skills_key},
    metrics::{self, Sort},
    otp::{self, OTP_DIGITS},
    storage,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Cache error: {source}"))]
    Cache { source: freelink_cache::Error },
    #[snafu(display("User {user} has not verified their phone number"))]
    Inactive { user: UserId, backtrace: Backtrace },
    #[snafu(display("The one-time password is invalid or has expired."))]
    InvalidOtp { backtrace: Backtrace },
    #[snafu(display("User {user} has no profile"))]
    MissingProfile { user: UserId, backtrace: Backtrace },
    #[snafu(display("There is no profile with id {id}"))]
    NoSuchProfile { id: ProfileId, backtrace: Backtrace },
    #[snafu(display("There is no skill with the given slug."))]
    NoSuchSkill { slug: Slug, backtrace: Backtrace },
    #[snafu(display("There is no user with the provided phone number."))]
    NoSuchUser {
        phone: PhoneNumber,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    Otp { source: otp::Error },
    #[snafu(display("The phone number {phone} is already registered"))]
    PhoneNumberClaimed {
        phone: PhoneNumber,
        backtrace: Backtrace,
    },
    #[snafu(display("Skill {slug} has already been selected"))]
    SkillAlreadySelected { slug: Slug, backtrace: Backtrace },
    #[snafu(display("Storage error: {source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Inactive { .. } => ErrorKind::Forbidden,
            Error::InvalidOtp { .. } => ErrorKind::Invalid,
            Error::NoSuchProfile { .. } | Error::NoSuchSkill { .. } | Error::NoSuchUser { .. } => {
                ErrorKind::NotFound
            }
            Error::PhoneNumberClaimed { .. } | Error::SkillAlreadySelected { .. } => {
                ErrorKind::Conflict
            }
            Error::Cache { .. }
            | Error::MissingProfile { .. }
            | Error::Otp { .. }
            | Error::Storage { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                  Registration & verification                                   //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("users.registrations", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users.otp.issued", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users.otp.verified", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users.otp.failures", Sort::IntegralCounter) }

/// Draw a code for `user`, park it in the cache & send it to their phone
async fn issue_otp(state: &Freelink, user: &User) -> Result<()> {
    let code = otp::generate();
    set_value(
        state.cache.as_ref(),
        &otp_key(code.expose_secret(), user.phone()),
        &user.id(),
        Some(state.otp_ttl),
    )
    .await
    .context(CacheSnafu)?;
    state
        .otp_sender
        .send(user.phone(), &code)
        .await
        .context(OtpSnafu)?;
    debug!("Issued a one-time password for {}", user.id());
    counter_add!(state.instruments, "users.otp.issued", 1, &[]);
    Ok(())
}

async fn add_user(state: &Freelink, user: User, email: Option<UserEmail>) -> Result<(User, Profile)> {
    let profile = Profile::new(&user.id(), email);
    state
        .storage
        .add_user(&user, &profile)
        .await
        .map_err(|err| match err {
            storage::Error::PhoneNumberClaimed { phone, .. } => {
                PhoneNumberClaimedSnafu { phone }.build()
            }
            err => StorageSnafu.into_error(err),
        })?;
    Ok((user, profile))
}

/// Sign-up a new user
///
/// The new user is inactive until they [verify] the code this sends to `phone`.
pub async fn register(
    state: &Freelink,
    phone: &PhoneNumber,
    email: Option<UserEmail>,
) -> Result<(User, Profile)> {
    let (user, profile) = add_user(state, User::new(phone), email).await?;
    info!("Registered user {} with profile {}", user.id(), profile.id());
    counter_add!(state.instruments, "users.registrations", 1, &[]);
    issue_otp(state, &user).await?;
    Ok((user, profile))
}

/// Create an administrator; administrators need no verification
pub async fn add_admin(state: &Freelink, phone: &PhoneNumber) -> Result<(User, Profile)> {
    let (user, profile) = add_user(state, User::new_admin(phone), None).await?;
    info!("Added administrator {}", user.id());
    Ok((user, profile))
}

/// Look a user up by phone number
pub async fn user_for_phone(state: &Freelink, phone: &PhoneNumber) -> Result<User> {
    state
        .storage
        .user_for_phone(phone)
        .await
        .context(StorageSnafu)?
        .context(NoSuchUserSnafu {
            phone: phone.clone(),
        })
}

/// Look a user up by phone number, insisting they be active
pub async fn authenticate(state: &Freelink, phone: &PhoneNumber) -> Result<User> {
    let user = user_for_phone(state, phone).await?;
    ensure!(user.is_active(), InactiveSnafu { user: user.id() });
    Ok(user)
}

/// Send a fresh one-time password to `phone`
///
/// Any codes issued earlier remain good until they expire.
pub async fn resend_otp(state: &Freelink, phone: &PhoneNumber) -> Result<()> {
    let user = user_for_phone(state, phone).await?;
    issue_otp(state, &user).await
}

/// Check `code` against the codes issued to `phone`; on success, activate the user
///
/// A code may be used once.
pub async fn verify(state: &Freelink, phone: &PhoneNumber, code: &SecretString) -> Result<User> {
    async fn verify1(state: &Freelink, phone: &PhoneNumber, code: &str) -> Result<User> {
        // Anything that isn't six digits can't have been issued (& would make for a bad key)
        ensure!(
            code.len() == OTP_DIGITS && code.bytes().all(|b| b.is_ascii_digit()),
            InvalidOtpSnafu
        );
        let key = otp_key(code, phone);
        let id = get_value::<UserId>(state.cache.as_ref(), &key)
            .await
            .context(CacheSnafu)?
            .context(InvalidOtpSnafu)?;
        state.cache.delete(&key).await.context(CacheSnafu)?;
        state
            .storage
            .activate_user(&id)
            .await
            .context(StorageSnafu)?
            .context(NoSuchUserSnafu {
                phone: phone.clone(),
            })
    }

    match verify1(state, phone, code.expose_secret()).await {
        Ok(user) => {
            info!("User {} verified their phone number", user.id());
            counter_add!(state.instruments, "users.otp.verified", 1, &[]);
            Ok(user)
        }
        Err(err) => {
            counter_add!(state.instruments, "users.otp.failures", 1, &[]);
            Err(err)
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Profiles                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Replace the editable attributes of `user`'s profile
pub async fn update_profile(state: &Freelink, user: &User, update: ProfileUpdate) -> Result<Profile> {
    let mut profile = state
        .storage
        .profile_for_user(&user.id())
        .await
        .context(StorageSnafu)?
        .context(MissingProfileSnafu { user: user.id() })?;
    profile.apply(update);
    state
        .storage
        .update_profile(&profile)
        .await
        .context(StorageSnafu)?;
    Ok(profile)
}

/// Fetch a profile for display, counting the view
pub async fn profile_detail(state: &Freelink, id: &ProfileId) -> Result<Profile> {
    state
        .storage
        .increment_profile_views(id)
        .await
        .context(StorageSnafu)?
        .context(NoSuchProfileSnafu { id: *id })
}

/// Add the skill with slug `skill` to `profile`
///
/// Only published skills may be selected. The store is updated first & the cached skill list
/// deleted second, both under the invalidation fence; should the delete fail, the caller gets an
/// error but the selection stands.
pub async fn select_skill(state: &Freelink, profile: &Profile, skill: &Slug) -> Result<()> {
    let found = state
        .storage
        .skill_for_slug(skill)
        .await
        .context(StorageSnafu)?
        .filter(|s| s.is_published())
        .context(NoSuchSkillSnafu { slug: skill.clone() })?;
    let _fence = state.invalidation.write().await;
    state
        .storage
        .add_profile_skill(&profile.id(), &found.id())
        .await
        .map_err(|err| match err {
            storage::Error::SkillAlreadySelected { .. } => SkillAlreadySelectedSnafu {
                slug: skill.clone(),
            }
            .build(),
            err => StorageSnafu.into_error(err),
        })?;
    state
        .cache
        .delete(&skills_key(&profile.id()))
        .await
        .context(CacheSnafu)?;
    debug!("Profile {} selected skill {}", profile.id(), skill);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use std::{sync::Arc, time::Duration};

    use freelink_cache::{Cache, MemoryCache};

    use crate::{
        entities::{Category, City, Name, Skill},
        memory::InMemory,
        otp::MemorySender,
        selectors::my_skills,
    };

    fn state() -> (Freelink, MemorySender, MemoryCache) {
        let sender = MemorySender::new();
        let cache = MemoryCache::default();
        (
            Freelink::new(
                Arc::new(InMemory::new()),
                Arc::new(cache.clone()),
                Arc::new(sender.clone()),
            ),
            sender,
            cache,
        )
    }

    #[tokio::test]
    async fn register_and_verify() {
        let (state, sender, _) = state();
        let phone = PhoneNumber::new("09131111111").unwrap();
        let (user, profile) = register(&state, &phone, None).await.unwrap();
        assert!(!user.is_active());
        assert_eq!(profile.user_id(), user.id());

        let err = register(&state, &phone, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = authenticate(&state, &phone).await.unwrap_err();
        assert!(matches!(err, Error::Inactive { .. }));

        let err = verify(&state, &phone, &SecretString::from("12:456".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOtp { .. }));

        let code = sender.last_code(&phone).await.unwrap();
        let user = verify(&state, &phone, &code).await.unwrap();
        assert!(user.is_active());
        assert!(authenticate(&state, &phone).await.is_ok());

        // Single use
        let err = verify(&state, &phone, &code).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOtp { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn otp_expiry() {
        let (state, sender, _) = state();
        let state = state.with_otp_ttl(Duration::from_secs(120));
        let phone = PhoneNumber::new("09131111111").unwrap();
        register(&state, &phone, None).await.unwrap();
        let code = sender.last_code(&phone).await.unwrap();
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(matches!(
            verify(&state, &phone, &code).await,
            Err(Error::InvalidOtp { .. })
        ));

        // A fresh code works
        resend_otp(&state, &phone).await.unwrap();
        let code = sender.last_code(&phone).await.unwrap();
        assert!(verify(&state, &phone, &code).await.unwrap().is_active());

        let err = resend_otp(&state, &PhoneNumber::new("09131111112").unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            format!("{err}"),
            "There is no user with the provided phone number."
        );
    }

    #[tokio::test]
    async fn profiles() {
        let (state, _, _) = state();
        let phone = PhoneNumber::new("09131111111").unwrap();
        let (user, profile) = register(&state, &phone, Some(UserEmail::new("a@b.com").unwrap()))
            .await
            .unwrap();
        let updated = update_profile(
            &state,
            &user,
            ProfileUpdate {
                city: Some(City::new("Isfahan").unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        // Full overwrite: the e-mail address is gone
        assert!(updated.email().is_none());
        assert_eq!(updated.city().unwrap().as_ref(), "Isfahan");

        assert_eq!(profile_detail(&state, &profile.id()).await.unwrap().views(), 1);
        assert_eq!(profile_detail(&state, &profile.id()).await.unwrap().views(), 2);
        assert!(matches!(
            profile_detail(&state, &ProfileId::new()).await,
            Err(Error::NoSuchProfile { .. })
        ));
    }

    #[tokio::test]
    async fn skills() {
        let (state, _, cache) = state();
        let (_, profile) = add_admin(&state, &PhoneNumber::new("09131111111").unwrap())
            .await
            .unwrap();
        let category = Category::new(&Name::new("Backend").unwrap()).unwrap();
        state.storage.add_category(&category).await.unwrap();
        let django = Skill::new(&Name::new("Django").unwrap(), &category.id()).unwrap();
        state.storage.add_skill(&django).await.unwrap();

        // Unpublished skills can't be selected
        assert!(matches!(
            select_skill(&state, &profile, django.slug()).await,
            Err(Error::NoSuchSkill { .. })
        ));
        state
            .storage
            .set_skill_published(django.slug(), true)
            .await
            .unwrap();

        assert!(my_skills(&state, &profile).await.unwrap().is_empty());
        assert!(cache.get(&skills_key(&profile.id())).await.unwrap().is_some());
        select_skill(&state, &profile, django.slug()).await.unwrap();
        assert!(cache.get(&skills_key(&profile.id())).await.unwrap().is_none());
        assert_eq!(my_skills(&state, &profile).await.unwrap().len(), 1);

        assert!(matches!(
            select_skill(&state, &profile, django.slug()).await,
            Err(Error::SkillAlreadySelected { .. })
        ));
    }
}
