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

//! # One-time passwords
//!
//! freelink users prove they own their phone number by echoing back a six-digit code sent to it.
//!
//! Codes are drawn uniformly from the operating system's CSPRNG. Six digits is only a million
//! possibilities, which an attacker permitted unlimited guesses could exhaust well inside a code's
//! lifetime; throttling verification attempts is the job of whatever API layer sits in front of
//! [verify](crate::users::verify).
//!
//! Delivery is somebody else's problem, too: [OtpSender] abstracts over it. [LogSender] just writes
//! the code to the log, which is what you want during development & nowhere else.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use rand::{Rng, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use snafu::{Backtrace, IntoError, prelude::*};
use tokio::sync::Mutex;
use tracing::info;

use crate::entities::PhoneNumber;

/// Number of decimal digits in a code
pub const OTP_DIGITS: usize = 6;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to deliver a one-time password: {source}"))]
    Delivery {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        DeliverySnafu.into_error(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Draw a fresh code
pub fn generate() -> SecretString {
    SecretString::from(format!(
        "{:0width$}",
        OsRng.gen_range(0..10u32.pow(OTP_DIGITS as u32)),
        width = OTP_DIGITS
    ))
}

/// Deliver a one-time password to a phone
#[async_trait]
pub trait OtpSender {
    async fn send(&self, phone: &PhoneNumber, code: &SecretString) -> Result<()>;
}

/// "Deliver" codes by logging them
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSender;

#[async_trait]
impl OtpSender for LogSender {
    async fn send(&self, phone: &PhoneNumber, code: &SecretString) -> Result<()> {
        info!("One-time password for {phone}: {}", code.expose_secret());
        Ok(())
    }
}

/// Keep the last code sent to each phone in memory
///
/// Handy for tests, which need to read back what was "sent".
#[derive(Clone, Debug, Default)]
pub struct MemorySender {
    codes: Arc<Mutex<HashMap<PhoneNumber, SecretString>>>,
}

impl MemorySender {
    pub fn new() -> MemorySender {
        MemorySender::default()
    }
    /// The most recent code sent to `phone`, if any
    pub async fn last_code(&self, phone: &PhoneNumber) -> Option<SecretString> {
        self.codes.lock().await.get(phone).cloned()
    }
}

#[async_trait]
impl OtpSender for MemorySender {
    async fn send(&self, phone: &PhoneNumber, code: &SecretString) -> Result<()> {
        self.codes.lock().await.insert(phone.clone(), code.clone());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes() {
        for _ in 0..100 {
            let code = generate();
            let code = code.expose_secret();
            assert_eq!(code.len(), OTP_DIGITS);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
        // Codes never show-up in debug output
        assert!(!format!("{:?}", generate()).chars().any(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn memory_sender() {
        let sender = MemorySender::new();
        let phone = PhoneNumber::new("09131111111").unwrap();
        assert!(sender.last_code(&phone).await.is_none());
        sender
            .send(&phone, &SecretString::from("123456".to_owned()))
            .await
            .unwrap();
        assert_eq!(
            sender.last_code(&phone).await.unwrap().expose_secret(),
            "123456"
        );
    }
}
