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

//! # flctl
//!
//! A command-line front-end to freelink.
//!
//! `flctl` speaks directly to a SQLite database (there is no server involved) & keeps its cache in
//! process. That means anything cached lives only as long as a single invocation, which is mostly
//! harmless: the cache is an optimization. The one place it shows is one-time passwords, which are
//! *only* kept in the cache; `register` & `verify` therefore issue a code & then read it back from
//! stdin within the same process.
//!
//! The acting user is named by `--as <phone>`. Commands that act on "my" followers, skills,
//! portfolios & so on act on that user's profile.

use std::{
    fs,
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::{Arg, ArgAction, ArgMatches, Command, crate_authors, crate_version, value_parser};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use snafu::{IntoError, OptionExt, ResultExt, Snafu};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};

use freelink::{
    entities::{
        Age, Bio, Category, City, Comment, CommentId, CommentText, Description, Name, PhoneNumber,
        Portfolio, Profile, ProfileId, ProfileSummary, ProfileUpdate, Sex, Skill, Slug, User,
        UserEmail,
    },
    freelink::Freelink,
    otp::LogSender,
    portfolio, selectors, skills,
    sqlite::{self, Sqlite},
    subscriptions, users,
};
use freelink_cache::MemoryCache;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Snafu)]
enum Error {
    #[snafu(display("Failed to read configuration file {path:?}: {source}"))]
    BadConfig { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to parse the configuration file: {source}"))]
    Config { source: toml::de::Error },
    #[snafu(display("Failed to build a tracing filter: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to serialize output: {source}"))]
    Json { source: serde_json::Error },
    #[snafu(display("This sub-command must be run --as some user"))]
    NoActor,
    #[snafu(display("No sub-command given; try `flctl --help`"))]
    NoSubCommand,
    #[snafu(display("{source} ({})", source.kind()))]
    Portfolio { source: portfolio::Error },
    #[snafu(display("Failed to read the one-time password: {source}"))]
    Prompt { source: io::Error },
    #[snafu(display("{source} ({})", source.kind()))]
    Selectors { source: selectors::Error },
    #[snafu(display("{source} ({})", source.kind()))]
    Skills { source: skills::Error },
    #[snafu(display("Failed to open the database: {source}"))]
    Sqlite { source: sqlite::Error },
    #[snafu(display("{source} ({})", source.kind()))]
    Subscriptions { source: subscriptions::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::dispatcher::SetGlobalDefaultError,
    },
    #[snafu(display("{source} ({})", source.kind()))]
    Users { source: users::Error },
}

// `main()` returning an error prints its `Debug` representation; make that readable.
impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Current configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
struct ConfigV1 {
    /// Path to the SQLite database
    pub database: PathBuf,
    /// Lifetime of one-time passwords, in seconds
    pub otp_ttl: u64,
    /// How often the cache sweeps expired entries, in seconds
    pub cache_clean_frequency: u64,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            database: PathBuf::from("freelink.db"),
            otp_ttl: 120,
            cache_clean_frequency: 60,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "version", deny_unknown_fields)] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

impl Configuration {
    pub fn set_database(self, database: PathBuf) -> Self {
        match self {
            Configuration::V1(config_v1) => Configuration::V1(ConfigV1 {
                database,
                ..config_v1
            }),
        }
    }
    pub fn database(&self) -> &PathBuf {
        match self {
            Configuration::V1(config_v1) => &config_v1.database,
        }
    }
    pub fn otp_ttl(&self) -> Duration {
        match self {
            Configuration::V1(config_v1) => Duration::from_secs(config_v1.otp_ttl),
        }
    }
    pub fn cache_clean_frequency(&self) -> Duration {
        match self {
            Configuration::V1(config_v1) => Duration::from_secs(config_v1.cache_clean_frequency),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::V1(ConfigV1::default())
    }
}

/// Read the configuration file named on the command line, or the default if none was named
///
/// A missing *default* file is fine; a missing file the user asked for by name is not.
fn read_configuration(matches: &ArgMatches) -> Result<Configuration> {
    let (path, explicit) = match matches.get_one::<PathBuf>("config") {
        Some(path) => (path.clone(), true),
        None => match std::env::var_os("HOME") {
            Some(home) => (PathBuf::from(home).join(".flctl.toml"), false),
            None => return Ok(Configuration::default()),
        },
    };
    match fs::read_to_string(&path) {
        Ok(text) => toml::from_str(&text).context(ConfigSnafu),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => {
            debug!("No configuration file at {path:?}; using defaults.");
            Ok(Configuration::default())
        }
        Err(err) => Err(BadConfigSnafu { path }.into_error(err)),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            logging                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Log to stderr, so that stdout carries nothing but command output
fn configure_logging(logopts: &LogOpts) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;
    // `json()` & `compact()` produce layers of different types, hence the box
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(io::stderr))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stderr),
        )
    };
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             output                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Print `value` as JSON if asked, else as whatever `plain` makes of it
fn emit<T: Serialize + ?Sized>(
    json: bool,
    value: &T,
    plain: impl FnOnce(&T) -> String,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value).context(JsonSnafu)?);
    } else {
        let text = plain(value);
        if !text.is_empty() {
            println!("{text}");
        }
    }
    Ok(())
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_owned())
}

fn show_profile(profile: &Profile) -> String {
    format!(
        "{}\n    email: {}\n    city: {}\n    age: {}\n    sex: {}\n    plan: {}\n    score: {}\n    views: {}\n    bio: {}",
        profile.id(),
        or_dash(profile.email()),
        or_dash(profile.city()),
        or_dash(profile.age()),
        or_dash(profile.sex()),
        profile.plan(),
        profile.score(),
        profile.views(),
        or_dash(profile.bio()),
    )
}

fn show_summaries(summaries: &[ProfileSummary]) -> String {
    summaries
        .iter()
        .map(|s| {
            format!(
                "{} {} {} {} (since {})",
                s.id,
                or_dash(s.email.as_ref()),
                or_dash(s.city.as_ref()),
                s.plan,
                s.since.format("%Y-%m-%d %H:%M:%S")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn show_categories(categories: &[Category]) -> String {
    categories
        .iter()
        .map(|c| {
            format!(
                "{} \"{}\"{}",
                c.slug(),
                c.name(),
                if c.is_published() { "" } else { " (unpublished)" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn show_skills(skills: &[Skill]) -> String {
    skills
        .iter()
        .map(|s| format!("{} \"{}\"", s.slug(), s.name()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn show_portfolio(portfolio: &Portfolio) -> String {
    format!(
        "{} \"{}\" views: {}{}{}",
        portfolio.slug(),
        portfolio.title(),
        portfolio.views(),
        if portfolio.is_published() { "" } else { " (unpublished)" },
        portfolio
            .description()
            .map(|d| format!("\n    {d}"))
            .unwrap_or_default()
    )
}

fn show_comments(comments: &[Comment]) -> String {
    comments
        .iter()
        .map(|c| {
            format!(
                "{} {} {}: {}",
                c.id(),
                c.created().format("%Y-%m-%d %H:%M:%S"),
                c.author(),
                c.text()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         sub-commands                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Authenticate the user named by `--as`
async fn acting_user(state: &Freelink, matches: &ArgMatches) -> Result<User> {
    let phone = matches.get_one::<PhoneNumber>("as").context(NoActorSnafu)?;
    users::authenticate(state, phone).await.context(UsersSnafu)
}

/// Authenticate the user named by `--as` & fetch their profile
async fn acting_profile(state: &Freelink, matches: &ArgMatches) -> Result<Profile> {
    let user = acting_user(state, matches).await?;
    selectors::get_profile(state, &user)
        .await
        .context(SelectorsSnafu)
}

/// Read the code just sent to `phone` from stdin & verify it
async fn prompt_and_verify(state: &Freelink, phone: &PhoneNumber) -> Result<User> {
    eprint!("Enter the code sent to {phone}: ");
    io::stderr().flush().context(PromptSnafu)?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context(PromptSnafu)?;
    users::verify(state, phone, &SecretString::from(line.trim().to_owned()))
        .await
        .context(UsersSnafu)
}

fn show_user(user: &User) -> String {
    format!(
        "{} {}{}{}",
        user.id(),
        user.phone(),
        if user.is_active() { "" } else { " (inactive)" },
        if user.is_admin() { " (admin)" } else { "" }
    )
}

async fn register(state: &Freelink, json: bool, matches: &ArgMatches) -> Result<()> {
    let phone = matches.get_one::<PhoneNumber>("PHONE").unwrap(/* impossible */);
    let (mut user, profile) =
        users::register(state, phone, matches.get_one::<UserEmail>("email").cloned())
            .await
            .context(UsersSnafu)?;
    if !matches.get_flag("no-verify") {
        user = prompt_and_verify(state, phone).await?;
    }
    emit(json, &(user, profile), |(user, profile)| {
        format!("{}\n{}", show_user(user), show_profile(profile))
    })
}

async fn update_profile(state: &Freelink, json: bool, matches: &ArgMatches) -> Result<()> {
    let user = acting_user(state, matches).await?;
    let current = selectors::get_profile(state, &user)
        .await
        .context(SelectorsSnafu)?;
    // Attributes not named on the command line keep their current values
    let update = ProfileUpdate {
        email: matches
            .get_one::<UserEmail>("email")
            .cloned()
            .or_else(|| current.email().cloned()),
        bio: matches
            .get_one::<Bio>("bio")
            .cloned()
            .or_else(|| current.bio().cloned()),
        age: matches.get_one::<Age>("age").copied().or(current.age()),
        sex: matches.get_one::<Sex>("sex").copied().or(current.sex()),
        city: matches
            .get_one::<City>("city")
            .cloned()
            .or_else(|| current.city().cloned()),
    };
    let profile = users::update_profile(state, &user, update)
        .await
        .context(UsersSnafu)?;
    emit(json, &profile, show_profile)
}

async fn dispatch(state: &Freelink, json: bool, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("register", matches)) => register(state, json, matches).await,
        Some(("add-admin", matches)) => {
            let (user, profile) = users::add_admin(
                state,
                matches.get_one::<PhoneNumber>("PHONE").unwrap(/* impossible */),
            )
            .await
            .context(UsersSnafu)?;
            emit(json, &(user, profile), |(user, profile)| {
                format!("{}\n{}", show_user(user), show_profile(profile))
            })
        }
        Some(("resend-otp", matches)) => users::resend_otp(
            state,
            matches.get_one::<PhoneNumber>("PHONE").unwrap(/* impossible */),
        )
        .await
        .context(UsersSnafu),
        Some(("verify", matches)) => {
            let phone = matches.get_one::<PhoneNumber>("PHONE").unwrap(/* impossible */);
            users::resend_otp(state, phone).await.context(UsersSnafu)?;
            let user = prompt_and_verify(state, phone).await?;
            emit(json, &user, show_user)
        }
        Some(("profile", matches)) => {
            emit(json, &acting_profile(state, matches).await?, show_profile)
        }
        Some(("update-profile", matches)) => update_profile(state, json, matches).await,
        Some(("detail", matches)) => {
            let profile = users::profile_detail(
                state,
                matches.get_one::<ProfileId>("PROFILE").unwrap(/* impossible */),
            )
            .await
            .context(UsersSnafu)?;
            emit(json, &profile, show_profile)
        }
        Some(("freelancers", _)) => {
            let profiles = selectors::freelancers(state)
                .await
                .context(SelectorsSnafu)?;
            emit(json, &profiles, |profiles| {
                profiles
                    .iter()
                    .map(show_profile)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Some(("follow", matches)) => {
            let follower = acting_profile(state, matches).await?;
            let subscription = subscriptions::subscribe(
                state,
                &follower,
                matches.get_one::<ProfileId>("PROFILE").unwrap(/* impossible */),
            )
            .await
            .context(SubscriptionsSnafu)?;
            emit(json, &subscription, |s| {
                format!("{} now follows {}", s.follower(), s.target())
            })
        }
        Some(("unfollow", matches)) => {
            let follower = acting_profile(state, matches).await?;
            subscriptions::unsubscribe(
                state,
                &follower,
                matches.get_one::<ProfileId>("PROFILE").unwrap(/* impossible */),
            )
            .await
            .context(SubscriptionsSnafu)
        }
        Some(("followers", matches)) => {
            let profile = acting_profile(state, matches).await?;
            let followers = selectors::my_followers(state, &profile)
                .await
                .context(SelectorsSnafu)?;
            emit(json, followers.as_slice(), show_summaries)
        }
        Some(("followings", matches)) => {
            let profile = acting_profile(state, matches).await?;
            let followings = selectors::my_followings(state, &profile)
                .await
                .context(SelectorsSnafu)?;
            emit(json, followings.as_slice(), show_summaries)
        }
        Some(("add-category", matches)) => {
            let admin = acting_user(state, matches).await?;
            let category = skills::create_category(
                state,
                &admin,
                matches.get_one::<Name>("NAME").unwrap(/* impossible */),
            )
            .await
            .context(SkillsSnafu)?;
            emit(json, std::slice::from_ref(&category), show_categories)
        }
        Some(("add-skill", matches)) => {
            let admin = acting_user(state, matches).await?;
            let skill = skills::create_skill(
                state,
                &admin,
                matches.get_one::<Name>("NAME").unwrap(/* impossible */),
                matches.get_one::<Slug>("category").unwrap(/* impossible */),
            )
            .await
            .context(SkillsSnafu)?;
            emit(json, std::slice::from_ref(&skill), show_skills)
        }
        Some((cmd @ ("publish-category" | "unpublish-category"), matches)) => {
            let admin = acting_user(state, matches).await?;
            let slug = matches.get_one::<Slug>("SLUG").unwrap(/* impossible */);
            let result = if cmd == "publish-category" {
                skills::publish_category(state, &admin, slug).await
            } else {
                skills::unpublish_category(state, &admin, slug).await
            };
            result.context(SkillsSnafu)
        }
        Some((cmd @ ("publish-skill" | "unpublish-skill"), matches)) => {
            let admin = acting_user(state, matches).await?;
            let slug = matches.get_one::<Slug>("SLUG").unwrap(/* impossible */);
            let result = if cmd == "publish-skill" {
                skills::publish_skill(state, &admin, slug).await
            } else {
                skills::unpublish_skill(state, &admin, slug).await
            };
            result.context(SkillsSnafu)
        }
        Some(("categories", matches)) => {
            let categories = selectors::categories(
                state,
                matches.get_one::<String>("name").map(String::as_str),
            )
            .await
            .context(SelectorsSnafu)?;
            emit(json, categories.as_slice(), show_categories)
        }
        Some(("category-choices", _)) => {
            let names = selectors::category_choices(state)
                .await
                .context(SelectorsSnafu)?;
            emit(json, names.as_slice(), |names| names.join("\n"))
        }
        Some(("skills", matches)) => {
            let skills = selectors::skills(state, matches.get_one::<Slug>("category"))
                .await
                .context(SelectorsSnafu)?;
            emit(json, skills.as_slice(), show_skills)
        }
        Some(("select-skill", matches)) => {
            let profile = acting_profile(state, matches).await?;
            users::select_skill(
                state,
                &profile,
                matches.get_one::<Slug>("SLUG").unwrap(/* impossible */),
            )
            .await
            .context(UsersSnafu)
        }
        Some(("my-skills", matches)) => {
            let profile = acting_profile(state, matches).await?;
            let skills = selectors::my_skills(state, &profile)
                .await
                .context(SelectorsSnafu)?;
            emit(json, skills.as_slice(), show_skills)
        }
        Some(("add-portfolio", matches)) => {
            let profile = acting_profile(state, matches).await?;
            let portfolio = portfolio::create_portfolio(
                state,
                &profile,
                matches.get_one::<Name>("TITLE").unwrap(/* impossible */),
                matches.get_one::<Description>("description").cloned(),
            )
            .await
            .context(PortfolioSnafu)?;
            emit(json, &portfolio, show_portfolio)
        }
        Some(("view-portfolio", matches)) => {
            let portfolio = portfolio::view_portfolio(
                state,
                matches.get_one::<Slug>("SLUG").unwrap(/* impossible */),
            )
            .await
            .context(PortfolioSnafu)?;
            emit(json, &portfolio, show_portfolio)
        }
        Some(("publish-portfolio", matches)) => {
            let profile = acting_profile(state, matches).await?;
            portfolio::publish_portfolio(
                state,
                &profile,
                matches.get_one::<Slug>("SLUG").unwrap(/* impossible */),
            )
            .await
            .context(PortfolioSnafu)
        }
        Some(("delete-portfolio", matches)) => {
            let profile = acting_profile(state, matches).await?;
            portfolio::delete_portfolio(
                state,
                &profile,
                matches.get_one::<Slug>("SLUG").unwrap(/* impossible */),
            )
            .await
            .context(PortfolioSnafu)
        }
        Some(("my-portfolios", matches)) => {
            let profile = acting_profile(state, matches).await?;
            let portfolios = selectors::my_portfolios(state, &profile)
                .await
                .context(SelectorsSnafu)?;
            emit(json, portfolios.as_slice(), |portfolios| {
                portfolios
                    .iter()
                    .map(show_portfolio)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Some(("comment", matches)) => {
            let profile = acting_profile(state, matches).await?;
            let comment = portfolio::add_comment(
                state,
                &profile,
                matches.get_one::<Slug>("SLUG").unwrap(/* impossible */),
                matches.get_one::<CommentText>("TEXT").unwrap(/* impossible */),
            )
            .await
            .context(PortfolioSnafu)?;
            emit(json, std::slice::from_ref(&comment), show_comments)
        }
        Some(("comments", matches)) => {
            let comments = selectors::comments(
                state,
                matches.get_one::<Slug>("SLUG").unwrap(/* impossible */),
            )
            .await
            .context(SelectorsSnafu)?;
            emit(json, comments.as_slice(), show_comments)
        }
        Some(("delete-comment", matches)) => {
            let profile = acting_profile(state, matches).await?;
            portfolio::delete_comment(
                state,
                &profile,
                matches.get_one::<CommentId>("ID").unwrap(/* impossible */),
            )
            .await
            .context(PortfolioSnafu)
        }
        Some(_) => unimplemented!(/* impossible */),
        None => NoSubCommandSnafu.fail(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              main                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn phone_arg() -> Arg {
    Arg::new("PHONE")
        .required(true)
        .value_parser(value_parser!(PhoneNumber))
        .index(1)
        .help("Eleven-digit phone number")
}

fn slug_arg(what: &'static str) -> Arg {
    Arg::new("SLUG")
        .required(true)
        .value_parser(value_parser!(Slug))
        .index(1)
        .help(what)
}

fn profile_arg() -> Arg {
    Arg::new("PROFILE")
        .required(true)
        .value_parser(value_parser!(ProfileId))
        .index(1)
        .help("Profile ID")
}

fn email_arg() -> Arg {
    Arg::new("email")
        .short('e')
        .long("email")
        .num_args(1)
        .value_parser(value_parser!(UserEmail))
        .help("E-mail address")
}

fn command() -> Command {
    Command::new("flctl")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Administer a freelink database")
        .long_about(
            "Administer a freelink database.

flctl works directly against a freelink SQLite database. Most sub-commands act on
behalf of some user, named by their phone number with --as.",
        )
        .arg(
            Arg::new("as")
                .short('a')
                .long("as")
                .num_args(1)
                .global(true)
                .value_parser(value_parser!(PhoneNumber))
                .env("FLCTL_AS")
                .help("Act as the user with this phone number"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .env("FLCTL_CONFIG")
                .help("Specify the path to the configuration file (default ~/.flctl.toml)"),
        )
        .arg(
            Arg::new("database")
                .short('D')
                .long("database")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the SQLite database; overrides the configuration file"),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .num_args(0)
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Write results as JSON"),
        )
        .arg(
            Arg::new("plain")
                .short('p')
                .long("plain")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .help("Log in plain text rather than JSON"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .help("produce copious output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .help("produce more prolix output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .help("produce less output"),
        )
        .subcommand(
            Command::new("register")
                .about("Sign-up a new user")
                .long_about(
                    "Sign-up a new user.

A one-time password is sent to the given phone number; unless --no-verify is given,
flctl then waits for that code on stdin.",
                )
                .arg(phone_arg())
                .arg(email_arg())
                .arg(
                    Arg::new("no-verify")
                        .short('n')
                        .long("no-verify")
                        .num_args(0)
                        .action(ArgAction::SetTrue)
                        .help("Leave the new user unverified"),
                ),
        )
        .subcommand(
            Command::new("add-admin")
                .about("Create an administrator")
                .arg(phone_arg()),
        )
        .subcommand(
            Command::new("resend-otp")
                .about("Send a fresh one-time password")
                .arg(phone_arg()),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a phone number")
                .long_about(
                    "Verify a phone number.

A fresh one-time password is sent to the given number & then read from stdin.",
                )
                .arg(phone_arg()),
        )
        .subcommand(Command::new("profile").about("Show my profile"))
        .subcommand(
            Command::new("update-profile")
                .about("Update my profile")
                .long_about(
                    "Update my profile. Attributes not given on the command line keep their
current values.",
                )
                .arg(email_arg())
                .arg(
                    Arg::new("bio")
                        .short('b')
                        .long("bio")
                        .num_args(1)
                        .value_parser(value_parser!(Bio))
                        .help("A short biography"),
                )
                .arg(
                    Arg::new("age")
                        .short('A')
                        .long("age")
                        .num_args(1)
                        .value_parser(value_parser!(Age))
                        .help("Age, in years"),
                )
                .arg(
                    Arg::new("sex")
                        .short('s')
                        .long("sex")
                        .num_args(1)
                        .value_parser(value_parser!(Sex))
                        .help("M or F"),
                )
                .arg(
                    Arg::new("city")
                        .short('C')
                        .long("city")
                        .num_args(1)
                        .value_parser(value_parser!(City))
                        .help("City of residence"),
                ),
        )
        .subcommand(
            Command::new("detail")
                .about("Show someone's profile (counts as a view)")
                .arg(profile_arg()),
        )
        .subcommand(Command::new("freelancers").about("List freelancers, best score first"))
        .subcommand(
            Command::new("follow")
                .about("Follow a profile")
                .arg(profile_arg()),
        )
        .subcommand(
            Command::new("unfollow")
                .about("Stop following a profile")
                .arg(profile_arg()),
        )
        .subcommand(Command::new("followers").about("List the profiles following me"))
        .subcommand(Command::new("followings").about("List the profiles I follow"))
        .subcommand(
            Command::new("add-category")
                .about("Create a skill category (administrators only)")
                .arg(
                    Arg::new("NAME")
                        .required(true)
                        .value_parser(value_parser!(Name))
                        .index(1)
                        .help("Category name"),
                ),
        )
        .subcommand(
            Command::new("add-skill")
                .about("Create a skill (administrators only)")
                .arg(
                    Arg::new("category")
                        .short('c')
                        .long("category")
                        .required(true)
                        .num_args(1)
                        .value_parser(value_parser!(Slug))
                        .help("Slug of the category to which this skill belongs"),
                )
                .arg(
                    Arg::new("NAME")
                        .required(true)
                        .value_parser(value_parser!(Name))
                        .index(1)
                        .help("Skill name"),
                ),
        )
        .subcommand(
            Command::new("publish-category")
                .about("Publish a category (administrators only)")
                .arg(slug_arg("Category slug")),
        )
        .subcommand(
            Command::new("unpublish-category")
                .about("Withdraw a category (administrators only)")
                .arg(slug_arg("Category slug")),
        )
        .subcommand(
            Command::new("publish-skill")
                .about("Publish a skill (administrators only)")
                .arg(slug_arg("Skill slug")),
        )
        .subcommand(
            Command::new("unpublish-skill")
                .about("Withdraw a skill (administrators only)")
                .arg(slug_arg("Skill slug")),
        )
        .subcommand(
            Command::new("categories")
                .about("List published categories")
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .num_args(1)
                        .value_parser(value_parser!(String))
                        .help("Look for a category by name (case-insensitive)"),
                ),
        )
        .subcommand(
            Command::new("category-choices").about("List the names of the published categories"),
        )
        .subcommand(
            Command::new("skills")
                .about("List published skills")
                .arg(
                    Arg::new("category")
                        .short('c')
                        .long("category")
                        .num_args(1)
                        .value_parser(value_parser!(Slug))
                        .help("Only list skills in this category"),
                ),
        )
        .subcommand(
            Command::new("select-skill")
                .about("Add a skill to my profile")
                .arg(slug_arg("Skill slug")),
        )
        .subcommand(Command::new("my-skills").about("List my skills"))
        .subcommand(
            Command::new("add-portfolio")
                .about("Create a portfolio")
                .arg(
                    Arg::new("description")
                        .short('D')
                        .long("description")
                        .num_args(1)
                        .value_parser(value_parser!(Description))
                        .help("What this portfolio shows"),
                )
                .arg(
                    Arg::new("TITLE")
                        .required(true)
                        .value_parser(value_parser!(Name))
                        .index(1)
                        .help("Portfolio title"),
                ),
        )
        .subcommand(
            Command::new("view-portfolio")
                .about("Show a portfolio (counts as a view)")
                .arg(slug_arg("Portfolio slug")),
        )
        .subcommand(
            Command::new("publish-portfolio")
                .about("Publish one of my portfolios")
                .arg(slug_arg("Portfolio slug")),
        )
        .subcommand(
            Command::new("delete-portfolio")
                .about("Delete one of my portfolios, along with its comments")
                .arg(slug_arg("Portfolio slug")),
        )
        .subcommand(Command::new("my-portfolios").about("List my portfolios"))
        .subcommand(
            Command::new("comment")
                .about("Comment on a portfolio")
                .arg(slug_arg("Portfolio slug"))
                .arg(
                    Arg::new("TEXT")
                        .required(true)
                        .value_parser(value_parser!(CommentText))
                        .index(2)
                        .help("Comment text"),
                ),
        )
        .subcommand(
            Command::new("comments")
                .about("List the comments on a portfolio")
                .arg(slug_arg("Portfolio slug")),
        )
        .subcommand(
            Command::new("delete-comment")
                .about("Delete one of my comments")
                .arg(
                    Arg::new("ID")
                        .required(true)
                        .value_parser(value_parser!(CommentId))
                        .index(1)
                        .help("Comment ID"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = command().get_matches();

    configure_logging(&LogOpts::new(&matches))?;

    let mut cfg = read_configuration(&matches)?;
    if let Some(database) = matches.get_one::<PathBuf>("database").cloned() {
        cfg = cfg.set_database(database);
    }
    debug!("Configuration: {cfg:?}");

    let state = Freelink::new(
        Arc::new(Sqlite::open(cfg.database()).context(SqliteSnafu)?),
        Arc::new(MemoryCache::new(cfg.cache_clean_frequency())),
        Arc::new(LogSender),
    )
    .with_otp_ttl(cfg.otp_ttl());

    dispatch(&state, matches.get_flag("json"), &matches).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli() {
        command().debug_assert();
    }

    #[test]
    fn configuration() {
        let cfg: Configuration = toml::from_str(
            r#"version = "1"
database = "/tmp/fl.db"
otp-ttl = 30
"#,
        )
        .unwrap();
        assert_eq!(cfg.database(), &PathBuf::from("/tmp/fl.db"));
        assert_eq!(cfg.otp_ttl(), Duration::from_secs(30));
        assert_eq!(cfg.cache_clean_frequency(), Duration::from_secs(60));

        let cfg = cfg.set_database(PathBuf::from("other.db"));
        assert_eq!(cfg.database(), &PathBuf::from("other.db"));

        assert!(toml::from_str::<Configuration>("version = \"1\"\nport = 8000\n").is_err());
        assert!(toml::from_str::<Configuration>("version = \"2\"\n").is_err());
    }

    #[test]
    fn dashes() {
        assert_eq!(or_dash(None::<String>), "-");
        assert_eq!(or_dash(Some(7)), "7");
    }
}
