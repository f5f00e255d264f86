// Booking references: "<brand prefix>-<BASE36>"

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

const BASE36_DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Error, Debug, PartialEq)]
pub enum ReferenceError {
    #[error("Invalid booking reference: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookingReference(String);

impl BookingReference {
    // Random 122-bit body, so concurrent sessions cannot collide the way
    // millisecond timestamps do.
    pub fn generate(prefix: &str) -> Self {
        Self::from_parts(prefix, Uuid::new_v4().as_u128())
    }

    pub fn from_parts(prefix: &str, value: u128) -> Self {
        Self(format!("{}-{}", prefix, to_base36(value)))
    }

    pub fn parse(value: &str) -> Result<Self, ReferenceError> {
        let invalid = || ReferenceError::InvalidFormat(value.to_string());
        let (prefix, body) = value.split_once('-').ok_or_else(invalid)?;

        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        if body.is_empty()
            || !body
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        {
            return Err(invalid());
        }

        Ok(Self(value.to_string()))
    }

    pub fn prefix(&self) -> &str {
        self.0.split_once('-').map_or("", |(prefix, _)| prefix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BookingReference {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BookingReference> for String {
    fn from(reference: BookingReference) -> Self {
        reference.0
    }
}

pub fn to_base36(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    // only ASCII digits were pushed
    String::from_utf8(digits).unwrap_or_default()
}
