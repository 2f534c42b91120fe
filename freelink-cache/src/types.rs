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

//! # Basic types used throughout [freelink-cache](crate)
//!
//! Cache keys are plain strings on the wire, but I don't want callers assembling them by hand: ad
//! hoc string interpolation is how two unrelated call sites wind up clobbering each other's
//! entries. A [Key] is always built from a namespace plus one or more parts, joined with a colon.

use std::{fmt::Display, ops::Deref};

use serde::{Deserialize, Serialize};

/// Separates the namespace & parts of a [Key]
pub const SEPARATOR: char = ':';

/// A cache key
///
/// Keys look like "namespace:part0:part1...". Neither the namespace nor any part may contain the
/// separator, so two keys built from different inputs can never collide. Constructors panic on
/// violation: keys are assembled from identifiers & refined types, so a bad key is a logic error,
/// not bad input.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Build a [Key] with no parts beyond the namespace
    pub fn singleton(namespace: &'static str) -> Key {
        assert!(check_part(namespace), "bad cache key namespace {namespace}");
        Key(namespace.to_owned())
    }
    /// Build a [Key] from a namespace & a list of parts
    pub fn new<P: AsRef<str>>(namespace: &'static str, parts: &[P]) -> Key {
        assert!(check_part(namespace), "bad cache key namespace {namespace}");
        let mut s = namespace.to_owned();
        parts.iter().for_each(|part| {
            let part = part.as_ref();
            assert!(check_part(part), "bad cache key part {part}");
            s.push(SEPARATOR);
            s.push_str(part);
        });
        Key(s)
    }
    /// The namespace with which this [Key] was built
    pub fn namespace(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or(&self.0)
    }
}

fn check_part(s: &str) -> bool {
    !s.is_empty() && !s.contains(SEPARATOR)
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Key {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys() {
        let k = Key::new("followers", &["8d3c"]);
        assert_eq!(k.as_ref(), "followers:8d3c");
        assert_eq!(k.namespace(), "followers");
        assert_eq!(
            Key::new("otp", &["09131111111", "123456"]).as_ref(),
            "otp:09131111111:123456"
        );
        assert_eq!(Key::singleton("categories").as_ref(), "categories");
        assert_ne!(Key::new("followers", &["a"]), Key::new("followings", &["a"]));
    }

    #[test]
    #[should_panic]
    fn separator_in_part() {
        Key::new("followers", &["a:b"]);
    }

    #[test]
    #[should_panic]
    fn empty_part() {
        Key::new("followers", &[""]);
    }
}
