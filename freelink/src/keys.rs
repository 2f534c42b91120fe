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

//! # freelink cache keys
//!
//! Every cache entry freelink reads or writes is named by one of the functions in this module. No
//! other code builds keys.

use freelink_cache::Key;

use crate::entities::{PhoneNumber, ProfileId};

/// The profiles following `profile`
pub fn followers_key(profile: &ProfileId) -> Key {
    Key::new("followers", &[profile.to_raw_string()])
}

/// The profiles `profile` follows
pub fn followings_key(profile: &ProfileId) -> Key {
    Key::new("followings", &[profile.to_raw_string()])
}

/// The skills `profile` has selected
pub fn skills_key(profile: &ProfileId) -> Key {
    Key::new("skills", &[profile.to_raw_string()])
}

/// The names of all published categories
pub fn category_choices_key() -> Key {
    Key::singleton("category_choices")
}

/// The one-time password `code` issued to `phone`
// The code is part of the key, so that a guess is a point lookup; the value is just the user id.
pub fn otp_key(code: &str, phone: &PhoneNumber) -> Key {
    Key::new("otp", &[phone.as_ref(), code])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys() {
        let p = ProfileId::from_raw_string("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert_eq!(
            followers_key(&p).as_ref(),
            "followers:67e5504410b1426f9247bb680e5fe0c8"
        );
        assert_eq!(
            followings_key(&p).as_ref(),
            "followings:67e5504410b1426f9247bb680e5fe0c8"
        );
        assert_ne!(followers_key(&p), followings_key(&p));
        assert_ne!(followers_key(&p), followers_key(&ProfileId::new()));
        assert_eq!(category_choices_key().as_ref(), "category_choices");
        let phone = PhoneNumber::new("09131111111").unwrap();
        assert_eq!(otp_key("012345", &phone).as_ref(), "otp:09131111111:012345");
    }
}
