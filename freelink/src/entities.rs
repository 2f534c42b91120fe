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

//! # freelink models
//!
//! ## Introduction
//!
//! I hate these sort of "catch-all" modules named "models" or "entities", but these types are truly
//! foundational: everything else in freelink is expressed in terms of them.
//!
//! ## Refined types
//!
//! Wherever a field has constraints (a phone number is eleven digits, a bio may not exceed a
//! thousand characters, & so on) it gets its own type whose only constructors check them. Once you
//! hold a [PhoneNumber], it's a legit phone number; nothing downstream re-validates. That includes
//! deserialization: each refined type implements [Deserialize] by hand, going through its
//! validating constructor.

use std::{fmt::Display, ops::Deref, str::FromStr};

use chrono::{DateTime, SubsecRound, Utc};
use email_address::EmailAddress;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{Backtrace, prelude::*};
use uuid::Uuid;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{age} is not a valid age; ages must be between 1 & 99"))]
    BadAge { age: u8, backtrace: Backtrace },
    #[snafu(display("{email} is not a valid e-mail address"))]
    BadEmail { email: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid {what}: {why}"))]
    BadText {
        what: &'static str,
        text: String,
        why: String,
        backtrace: Backtrace,
    },
    #[snafu(display("The phone number must be exactly eleven digits; got {text}"))]
    BadPhoneNumber { text: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a freelink plan"))]
    BadPlan { text: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid sex (M or F)"))]
    BadSex { text: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid slug"))]
    BadSlug { text: String, backtrace: Backtrace },
    #[snafu(display("A profile may not subscribe to itself"))]
    SelfSubscription { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{}", err))
}

/// The current time, truncated to microseconds
///
/// Every timestamp freelink stores is created here. The SQLite backend keeps microseconds since
/// the epoch, so truncating up-front means a value read back from storage compares equal to the one
/// that was written.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// define_id!
///
/// # Introduction
///
/// Use this to declare a type intended to be used as an opaque identifier for some other sort of
/// entity.
///
/// # Background
///
/// Identifiers in freelink are handed to the outside world (the subscription API, for instance,
/// names the profile to be followed by its identifier), so they must not be guessable: no
/// auto-increment columns. Each is a random (v4) UUID. I could have just used [Uuid] everywhere,
/// but I couldn't bring myself to use the same type to identify users, profiles & portfolios.
///
/// This macro defines a newtype struct wrapping [Uuid] implementing [Display] & [FromStr] (so it
/// can be used with clap's `value_parser!`).
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new() -> $type_name {
                $type_name(Uuid::new_v4())
            }
            pub fn from_raw_string(s: &str) -> StdResult<$type_name, uuid::Error> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
            /// Format as thirty-two hex digits, no hyphens; this is the form used in cache keys
            pub fn to_raw_string(&self) -> String {
                format!("{}", self.0.as_simple())
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
        impl FromStr for $type_name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                $type_name::from_raw_string(s)
            }
        }
    };
}

define_id!(UserId);
define_id!(ProfileId);
define_id!(CategoryId);
define_id!(SkillId);
define_id!(PortfolioId);
define_id!(CommentId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          PhoneNumber                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

const PHONE_NUMBER_LENGTH: usize = 11;

fn check_phone_number(s: &str) -> bool {
    s.len() == PHONE_NUMBER_LENGTH && s.bytes().all(|b| b.is_ascii_digit())
}

/// A refined type representing a user's phone number
///
/// freelink users sign-up, & sign-in, with their phone number, which must be exactly eleven ASCII
/// digits (e.g. "09131111111").
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn new(text: &str) -> Result<PhoneNumber> {
        check_phone_number(text)
            .then_some(PhoneNumber(text.to_owned()))
            .ok_or(
                BadPhoneNumberSnafu {
                    text: text.to_owned(),
                }
                .build(),
            )
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for PhoneNumber {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `PhoneNumber`
impl<'de> Deserialize<'de> for PhoneNumber {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        PhoneNumber::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PhoneNumber {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PhoneNumber::new(s)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = Error;

    fn try_from(text: String) -> std::result::Result<Self, Self::Error> {
        if check_phone_number(&text) {
            Ok(PhoneNumber(text))
        } else {
            BadPhoneNumberSnafu { text }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           UserEmail                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type representing an e-mail address
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new(email: &str) -> Result<UserEmail> {
        EmailAddress::is_valid(email)
            .then_some(UserEmail(email.to_string()))
            .context(BadEmailSnafu {
                email: email.to_string(),
            })
    }
}

impl AsRef<str> for UserEmail {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for UserEmail {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for UserEmail {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        UserEmail::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for UserEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserEmail {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        UserEmail::new(s)
    }
}

impl TryFrom<String> for UserEmail {
    type Error = Error;

    fn try_from(email: String) -> std::result::Result<Self, Self::Error> {
        if EmailAddress::is_valid(&email) {
            Ok(UserEmail(email))
        } else {
            BadEmailSnafu { email }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Bounded text                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

// Boy... writing refined types in Rust involves a *lot* of boilerplate. Most of the free-text
// fields in freelink differ only in their length limits, so at least those get a macro.

/// bounded_text!
///
/// Define a refined string type whose length in `char`s must lie in `$min..=$max`. `$what` names
/// the thing for error messages.
macro_rules! bounded_text {
    ($(#[$meta:meta])* $type_name:ident, $what:expr, $min:expr, $max:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $type_name(String);

        impl $type_name {
            pub const MIN_LENGTH: usize = $min;
            pub const MAX_LENGTH: usize = $max;
            pub fn new(text: &str) -> Result<$type_name> {
                $type_name::try_from(text.to_owned())
            }
        }

        impl AsRef<str> for $type_name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $type_name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<'de> Deserialize<'de> for $type_name {
            fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                $type_name::try_from(s).map_err(mk_serde_de_err::<'de, D>)
            }
        }

        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $type_name {
            type Err = Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $type_name::new(s)
            }
        }

        impl TryFrom<String> for $type_name {
            type Error = Error;

            fn try_from(text: String) -> std::result::Result<Self, Self::Error> {
                let n = text.chars().count();
                if n < $min {
                    BadTextSnafu {
                        what: $what,
                        text,
                        why: format!("it must be at least {} characters", $min),
                    }
                    .fail()
                } else if n > $max {
                    BadTextSnafu {
                        what: $what,
                        text,
                        why: format!("it may be at most {} characters", $max),
                    }
                    .fail()
                } else {
                    Ok($type_name(text))
                }
            }
        }
    };
}

bounded_text!(
    /// A profile's free-form biography
    Bio,
    "bio",
    0,
    1000
);
bounded_text!(
    /// The city in which a freelancer lives
    City,
    "city",
    1,
    100
);
bounded_text!(
    /// The name of a skill category, a skill, or the title of a portfolio
    Name,
    "name",
    1,
    250
);
bounded_text!(Description, "description", 0, 1000);
bounded_text!(CommentText, "comment", 1, 1000);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Slug                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref SLUG: Regex = Regex::new("^[a-z0-9]+(-[a-z0-9]+)*$").unwrap(/* known good */);
}

fn check_slug(s: &str) -> bool {
    SLUG.is_match(s)
}

/// A URL-friendly handle derived from a name
///
/// Categories, skills & portfolios are addressed by slug. A slug is runs of lowercase ASCII letters
/// & digits separated by single hyphens.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    /// Validate `text` as a [Slug] as-is
    pub fn new(text: &str) -> Result<Slug> {
        check_slug(text).then_some(Slug(text.to_owned())).ok_or(
            BadSlugSnafu {
                text: text.to_owned(),
            }
            .build(),
        )
    }
    /// Derive a [Slug] from free text
    ///
    /// Lowercase the text, map every run of characters that aren't ASCII letters or digits to a
    /// single hyphen, & trim leading & trailing hyphens. So "Backend Development" becomes
    /// "backend-development" & "Node.JS" becomes "node-js". Fails if nothing is left.
    pub fn slugify(text: &str) -> Result<Slug> {
        let mut out = String::with_capacity(text.len());
        let mut pending_dash = false;
        text.to_lowercase().chars().for_each(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                if pending_dash && !out.is_empty() {
                    out.push('-');
                }
                pending_dash = false;
                out.push(c);
            } else {
                pending_dash = true;
            }
        });
        Slug::new(&out).map_err(|_| {
            BadSlugSnafu {
                text: text.to_owned(),
            }
            .build()
        })
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Slug {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Slug::new(&s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Slug {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Slug::new(s)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    Small profile attributes                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A freelancer's age, in years
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Age(u8);

impl Age {
    pub fn new(age: u8) -> Result<Age> {
        (1..=99)
            .contains(&age)
            .then_some(Age(age))
            .context(BadAgeSnafu { age })
    }
}

impl From<Age> for u8 {
    fn from(value: Age) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for Age {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = <u8 as serde::Deserialize>::deserialize(deserializer)?;
        Age::new(n).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Age {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Age {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<u8>()
            .ok()
            .context(BadTextSnafu {
                what: "age",
                text: s.to_owned(),
                why: "it is not a number".to_owned(),
            })
            .and_then(Age::new)
    }
}

/// Subscription plan
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Plan {
    #[default]
    Free,
    Bronze,
    Silver,
    Gold,
}

impl Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Plan::Free => "FREE",
                Plan::Bronze => "BRONZE",
                Plan::Silver => "SILVER",
                Plan::Gold => "GOLD",
            }
        )
    }
}

impl FromStr for Plan {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(Plan::Free),
            "BRONZE" => Ok(Plan::Bronze),
            "SILVER" => Ok(Plan::Silver),
            "GOLD" => Ok(Plan::Gold),
            _ => BadPlanSnafu { text: s.to_owned() }.fail(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Sex::Male => "M",
                Sex::Female => "F",
            }
        )
    }
}

impl FromStr for Sex {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "M" => Ok(Sex::Male),
            "F" => Ok(Sex::Female),
            _ => BadSexSnafu { text: s.to_owned() }.fail(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A freelink user: the identity with which one signs-in
///
/// Everything a freelancer shows to the world lives on their [Profile]; a [User] is just the phone
/// number plus a couple of flags.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct User {
    pub(crate) id: UserId,
    pub(crate) phone: PhoneNumber,
    pub(crate) active: bool,
    pub(crate) admin: bool,
    pub(crate) created: DateTime<Utc>,
}

impl User {
    /// A new, inactive, non-admin user
    pub fn new(phone: &PhoneNumber) -> User {
        User {
            id: UserId::new(),
            phone: phone.clone(),
            active: false,
            admin: false,
            created: now(),
        }
    }
    /// A new administrator; administrators are active from the start
    pub fn new_admin(phone: &PhoneNumber) -> User {
        User {
            active: true,
            admin: true,
            ..User::new(phone)
        }
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn phone(&self) -> &PhoneNumber {
        &self.phone
    }
    pub fn is_active(&self) -> bool {
        self.active
    }
    pub fn is_admin(&self) -> bool {
        self.admin
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Profile                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A user's public face
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Profile {
    pub(crate) id: ProfileId,
    pub(crate) user_id: UserId,
    pub(crate) email: Option<UserEmail>,
    pub(crate) bio: Option<Bio>,
    pub(crate) age: Option<Age>,
    pub(crate) sex: Option<Sex>,
    pub(crate) city: Option<City>,
    pub(crate) plan: Plan,
    pub(crate) score: i64,
    pub(crate) views: u64,
    pub(crate) created: DateTime<Utc>,
}

/// The user-editable attributes of a [Profile]
///
/// An update replaces *all* of these; `None` clears the field.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProfileUpdate {
    pub email: Option<UserEmail>,
    pub bio: Option<Bio>,
    pub age: Option<Age>,
    pub sex: Option<Sex>,
    pub city: Option<City>,
}

impl Profile {
    /// A fresh profile for `user_id`: free plan, no score, no views
    pub fn new(user_id: &UserId, email: Option<UserEmail>) -> Profile {
        Profile {
            id: ProfileId::new(),
            user_id: *user_id,
            email,
            bio: None,
            age: None,
            sex: None,
            city: None,
            plan: Plan::default(),
            score: 0,
            views: 0,
            created: now(),
        }
    }
    pub fn apply(&mut self, update: ProfileUpdate) {
        self.email = update.email;
        self.bio = update.bio;
        self.age = update.age;
        self.sex = update.sex;
        self.city = update.city;
    }
    pub fn id(&self) -> ProfileId {
        self.id
    }
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
    pub fn email(&self) -> Option<&UserEmail> {
        self.email.as_ref()
    }
    pub fn bio(&self) -> Option<&Bio> {
        self.bio.as_ref()
    }
    pub fn age(&self) -> Option<Age> {
        self.age
    }
    pub fn sex(&self) -> Option<Sex> {
        self.sex
    }
    pub fn city(&self) -> Option<&City> {
        self.city.as_ref()
    }
    pub fn plan(&self) -> Plan {
        self.plan
    }
    pub fn score(&self) -> i64 {
        self.score
    }
    pub fn views(&self) -> u64 {
        self.views
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
    /// Summarize this profile as one end of a subscription created at `since`
    pub fn summarize(&self, since: DateTime<Utc>) -> ProfileSummary {
        ProfileSummary {
            id: self.id,
            email: self.email.clone(),
            city: self.city.clone(),
            score: self.score,
            plan: self.plan,
            since,
        }
    }
}

/// What the follower & following lists show about the profile at the other end of each edge
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub id: ProfileId,
    pub email: Option<UserEmail>,
    pub city: Option<City>,
    pub score: i64,
    pub plan: Plan,
    /// When the subscription was created
    pub since: DateTime<Utc>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Subscription                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A directed edge in the subscription graph: `follower` follows `target`
///
/// Edges have no identity beyond the ordered pair, & no update semantics: an edge exists or it
/// doesn't. (A follows B) says nothing about (B follows A).
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Subscription {
    pub(crate) follower: ProfileId,
    pub(crate) target: ProfileId,
    pub(crate) created: DateTime<Utc>,
}

impl Subscription {
    /// Correct-by-construction: a profile may not follow itself
    pub fn new(follower: &ProfileId, target: &ProfileId) -> Result<Subscription> {
        ensure!(follower != target, SelfSubscriptionSnafu);
        Ok(Subscription {
            follower: *follower,
            target: *target,
            created: now(),
        })
    }
    pub fn follower(&self) -> ProfileId {
        self.follower
    }
    pub fn target(&self) -> ProfileId {
        self.target
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Category & Skill                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A category in the skill taxonomy ("Backend Development", say)
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Category {
    pub(crate) id: CategoryId,
    pub(crate) name: Name,
    pub(crate) slug: Slug,
    pub(crate) published: bool,
    pub(crate) created: DateTime<Utc>,
}

impl Category {
    /// New categories are unpublished; the slug is derived from the name
    pub fn new(name: &Name) -> Result<Category> {
        Ok(Category {
            id: CategoryId::new(),
            name: name.clone(),
            slug: Slug::slugify(name)?,
            published: false,
            created: now(),
        })
    }
    pub fn id(&self) -> CategoryId {
        self.id
    }
    pub fn name(&self) -> &Name {
        &self.name
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn is_published(&self) -> bool {
        self.published
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

/// A skill a freelancer might list on their profile ("Django", say)
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Skill {
    pub(crate) id: SkillId,
    pub(crate) name: Name,
    pub(crate) slug: Slug,
    pub(crate) category: CategoryId,
    pub(crate) published: bool,
    pub(crate) created: DateTime<Utc>,
}

impl Skill {
    pub fn new(name: &Name, category: &CategoryId) -> Result<Skill> {
        Ok(Skill {
            id: SkillId::new(),
            name: name.clone(),
            slug: Slug::slugify(name)?,
            category: *category,
            published: false,
            created: now(),
        })
    }
    pub fn id(&self) -> SkillId {
        self.id
    }
    pub fn name(&self) -> &Name {
        &self.name
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn category(&self) -> CategoryId {
        self.category
    }
    pub fn is_published(&self) -> bool {
        self.published
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      Portfolio & Comment                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Portfolio {
    pub(crate) id: PortfolioId,
    pub(crate) profile: ProfileId,
    pub(crate) title: Name,
    pub(crate) slug: Slug,
    pub(crate) description: Option<Description>,
    pub(crate) views: u64,
    pub(crate) published: bool,
    pub(crate) created: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(
        profile: &ProfileId,
        title: &Name,
        description: Option<Description>,
    ) -> Result<Portfolio> {
        Ok(Portfolio {
            id: PortfolioId::new(),
            profile: *profile,
            title: title.clone(),
            slug: Slug::slugify(title)?,
            description,
            views: 0,
            published: false,
            created: now(),
        })
    }
    pub fn id(&self) -> PortfolioId {
        self.id
    }
    pub fn profile(&self) -> ProfileId {
        self.profile
    }
    pub fn title(&self) -> &Name {
        &self.title
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn description(&self) -> Option<&Description> {
        self.description.as_ref()
    }
    pub fn views(&self) -> u64 {
        self.views
    }
    pub fn is_published(&self) -> bool {
        self.published
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Comment {
    pub(crate) id: CommentId,
    pub(crate) portfolio: PortfolioId,
    pub(crate) author: ProfileId,
    pub(crate) text: CommentText,
    pub(crate) created: DateTime<Utc>,
}

impl Comment {
    pub fn new(portfolio: &PortfolioId, author: &ProfileId, text: &CommentText) -> Comment {
        Comment {
            id: CommentId::new(),
            portfolio: *portfolio,
            author: *author,
            text: text.clone(),
            created: now(),
        }
    }
    pub fn id(&self) -> CommentId {
        self.id
    }
    pub fn portfolio(&self) -> PortfolioId {
        self.portfolio
    }
    pub fn author(&self) -> ProfileId {
        self.author
    }
    pub fn text(&self) -> &CommentText {
        &self.text
    }
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn phone_numbers() {
        assert!(PhoneNumber::new("09131111111").is_ok());
        assert!(PhoneNumber::new("0913111111").is_err());
        assert!(PhoneNumber::new("091311111111").is_err());
        assert!(PhoneNumber::new("0913111111a").is_err());
        assert!(PhoneNumber::new("").is_err());
        assert!(serde_json::from_str::<PhoneNumber>("\"09131111111\"").is_ok());
        assert!(serde_json::from_str::<PhoneNumber>("\"123\"").is_err());
    }

    #[test]
    fn bounded_text() {
        assert!(Bio::new("").is_ok());
        assert!(Bio::new(&"x".repeat(1000)).is_ok());
        assert!(Bio::new(&"x".repeat(1001)).is_err());
        // Length is counted in characters, not bytes
        assert!(Bio::new(&"я".repeat(1000)).is_ok());
        assert!(City::new("").is_err());
        assert!(City::new("Isfahan").is_ok());
        assert!(Name::new(&"n".repeat(251)).is_err());
        assert!(CommentText::new("").is_err());
        assert!(serde_json::from_str::<City>("\"\"").is_err());
    }

    #[test]
    fn slugs() {
        assert_eq!(
            Slug::slugify("Backend Development").unwrap().as_ref(),
            "backend-development"
        );
        assert_eq!(Slug::slugify("Django").unwrap().as_ref(), "django");
        assert_eq!(Slug::slugify("Node.JS").unwrap().as_ref(), "node-js");
        assert_eq!(
            Slug::slugify("  New -- portfolio!  ").unwrap().as_ref(),
            "new-portfolio"
        );
        assert_eq!(Slug::slugify("C++ & Rust").unwrap().as_ref(), "c-rust");
        assert!(Slug::slugify("!!!").is_err());
        assert!(Slug::new("backend-development").is_ok());
        assert!(Slug::new("Backend").is_err());
        assert!(Slug::new("a--b").is_err());
        assert!(Slug::new("-a").is_err());
    }

    #[test]
    fn ages() {
        assert!(Age::new(0).is_err());
        assert!(Age::new(1).is_ok());
        assert!(Age::new(99).is_ok());
        assert!(Age::new(100).is_err());
        assert_eq!("42".parse::<Age>().unwrap(), Age::new(42).unwrap());
        assert!("forty-two".parse::<Age>().is_err());
        assert!(serde_json::from_str::<Age>("120").is_err());
    }

    #[test]
    fn plans_and_sexes() {
        assert_eq!("GOLD".parse::<Plan>().unwrap(), Plan::Gold);
        assert!("PLATINUM".parse::<Plan>().is_err());
        assert_eq!(format!("{}", Plan::default()), "FREE");
        assert_eq!(serde_json::to_string(&Plan::Silver).unwrap(), "\"SILVER\"");
        assert_eq!("F".parse::<Sex>().unwrap(), Sex::Female);
        assert_eq!(serde_json::to_string(&Sex::Male).unwrap(), "\"M\"");
    }

    #[test]
    fn identifiers() {
        let id = ProfileId::new();
        assert_eq!(ProfileId::from_raw_string(&id.to_raw_string()).unwrap(), id);
        assert_eq!(format!("{id}").parse::<ProfileId>().unwrap(), id);
        assert_ne!(ProfileId::new(), id);
        assert!("not-a-uuid".parse::<ProfileId>().is_err());
    }

    #[test]
    fn no_self_subscription() {
        let a = ProfileId::new();
        let b = ProfileId::new();
        assert!(matches!(
            Subscription::new(&a, &a),
            Err(Error::SelfSubscription { .. })
        ));
        let sub = Subscription::new(&a, &b).unwrap();
        assert_eq!(sub.follower(), a);
        assert_eq!(sub.target(), b);
    }

    #[test]
    fn users_and_profiles() {
        let phone = PhoneNumber::new("09131111111").unwrap();
        let user = User::new(&phone);
        assert!(!user.is_active());
        assert!(!user.is_admin());
        let admin = User::new_admin(&phone);
        assert!(admin.is_active() && admin.is_admin());

        let mut profile = Profile::new(&user.id(), None);
        assert_eq!(profile.plan(), Plan::Free);
        assert_eq!(profile.views(), 0);
        profile.apply(ProfileUpdate {
            email: Some(UserEmail::new("edited@gmail.com").unwrap()),
            city: Some(City::new("Tehran").unwrap()),
            ..Default::default()
        });
        assert_eq!(profile.email().unwrap().as_ref(), "edited@gmail.com");
        assert!(profile.bio().is_none());
    }
}
