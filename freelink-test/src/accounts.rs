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

//! Integration tests for registration, one-time passwords & profiles

use std::time::Duration;

use libtest_mimic::Failed;
use secrecy::{ExposeSecret, SecretString};

use freelink::{
    entities::{Age, City, PhoneNumber, ProfileId, ProfileUpdate, Sex, UserEmail},
    freelink::ErrorKind,
    selectors::get_profile,
    users::{
        Error, authenticate, profile_detail, register, resend_otp, update_profile, verify,
    },
};

use crate::{Harness, Storage};

/// Sign-up, fail to sign-in, verify, sign-in
pub async fn register_and_verify(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let phone = PhoneNumber::new("09131111111")?;
    let email = UserEmail::new("jdoe@example.com")?;

    let (user, profile) = register(&harness.state, &phone, Some(email.clone())).await?;
    assert!(!user.is_active());
    assert_eq!(profile.user_id(), user.id());
    assert_eq!(profile.email(), Some(&email));

    let err = match authenticate(&harness.state, &phone).await {
        Ok(_) => return Err("an unverified user authenticated".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::Inactive { .. }));
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let code = harness.code_for(&phone).await?;
    let verified = verify(&harness.state, &phone, &code).await?;
    assert!(verified.is_active());
    assert_eq!(verified.id(), user.id());
    assert_eq!(authenticate(&harness.state, &phone).await?.id(), user.id());

    // Codes are single-use
    assert!(matches!(
        verify(&harness.state, &phone, &code).await,
        Err(Error::InvalidOtp { .. })
    ));
    Ok(())
}

/// Registration rejects malformed & duplicate phone numbers
pub async fn bad_registrations(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    for bad in ["0913111111", "091311111111", "0913111111a", ""] {
        assert!(PhoneNumber::new(bad).is_err(), "{bad:?} was accepted");
    }

    let phone = PhoneNumber::new("09131111111")?;
    register(&harness.state, &phone, None).await?;
    let err = match register(&harness.state, &phone, None).await {
        Ok(_) => return Err("a phone number was registered twice".into()),
        Err(err) => err,
    };
    assert!(matches!(err, Error::PhoneNumberClaimed { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let stranger = PhoneNumber::new("09139999999")?;
    let err = match resend_otp(&harness.state, &stranger).await {
        Ok(_) => return Err("sent a code to an unknown number".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

/// Wrong, malformed & misdirected codes are all refused
pub async fn bad_codes(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let alice = PhoneNumber::new("09131111111")?;
    let bob = PhoneNumber::new("09132222222")?;
    register(&harness.state, &alice, None).await?;
    register(&harness.state, &bob, None).await?;

    let good = harness.code_for(&alice).await?;
    let wrong = SecretString::from(format!(
        "{:06}",
        (good.expose_secret().parse::<u32>()? + 1) % 1_000_000
    ));
    for code in [
        wrong,
        SecretString::from("12345".to_owned()),
        SecretString::from("abcdef".to_owned()),
        SecretString::from("otp:09131111111:123456".to_owned()),
    ] {
        let err = match verify(&harness.state, &alice, &code).await {
            Ok(_) => return Err("a bad code was accepted".into()),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
    // Alice's code is no good for Bob...
    assert!(verify(&harness.state, &bob, &good).await.is_err());
    // but still good for Alice.
    assert!(verify(&harness.state, &alice, &good).await?.is_active());
    Ok(())
}

/// Codes expire; a fresh one can be had
pub async fn otp_expiry(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::with_otp_ttl(storage, Duration::from_millis(100));
    let phone = PhoneNumber::new("09131111111")?;
    register(&harness.state, &phone, None).await?;
    let stale = harness.code_for(&phone).await?;

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(matches!(
        verify(&harness.state, &phone, &stale).await,
        Err(Error::InvalidOtp { .. })
    ));

    resend_otp(&harness.state, &phone).await?;
    let fresh = harness.code_for(&phone).await?;
    assert!(verify(&harness.state, &phone, &fresh).await?.is_active());
    Ok(())
}

/// Profile edits & view counting
pub async fn profiles(storage: Storage) -> Result<(), Failed> {
    let harness = Harness::new(storage);
    let (user, profile) = harness.freelancer("09131111111").await?;
    let (_, other) = harness.freelancer("09132222222").await?;

    let update = ProfileUpdate {
        city: Some(City::new("Tehran")?),
        age: Some(Age::new(31)?),
        sex: Some(Sex::Female),
        ..Default::default()
    };
    let updated = update_profile(&harness.state, &user, update).await?;
    assert_eq!(updated.id(), profile.id());
    assert_eq!(updated.city(), Some(&City::new("Tehran")?));
    assert_eq!(get_profile(&harness.state, &user).await?, updated);

    assert_eq!(profile_detail(&harness.state, &profile.id()).await?.views(), 1);
    assert_eq!(profile_detail(&harness.state, &profile.id()).await?.views(), 2);
    // Only the profile viewed is counted
    assert_eq!(
        harness
            .state
            .storage
            .profile_for_id(&other.id())
            .await?
            .map(|p| p.views()),
        Some(0)
    );

    let err = match profile_detail(&harness.state, &ProfileId::new()).await {
        Ok(_) => return Err("found a profile that doesn't exist".into()),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}
