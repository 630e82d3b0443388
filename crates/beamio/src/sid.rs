//! Session id type and generator.

use std::{
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};

use base64::Engine;
use rand::Rng;

/// A 120 bit session id, kept as its 20 char url-safe base64 form.
///
/// Ids are generated from a CSPRNG and are never reused within the process
/// lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid([u8; 20]);

impl Sid {
    /// A sid full of zeroes, only useful as a placeholder in tests.
    pub const ZERO: Self = Sid(*b"AAAAAAAAAAAAAAAAAAAA");

    /// Generate a new random session id.
    pub fn new() -> Self {
        let mut random = [0u8; 15]; // 15 bytes = 20 base64 chars
        let mut id = [0u8; 20];

        rand::thread_rng().fill(&mut random);

        base64::prelude::BASE64_URL_SAFE_NO_PAD
            .encode_slice(random, &mut id)
            .expect("20 chars is the exact encoded size of 15 bytes");

        Sid(id)
    }

    fn as_str(&self) -> &str {
        // SAFETY: the inner buffer only ever holds base64 url-safe chars
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

/// Error when decoding a [`Sid`] from a string.
#[derive(Debug, thiserror::Error)]
pub enum SidDecodeError {
    #[error("invalid url-safe base64 string")]
    InvalidBase64String,
    #[error("invalid sid length")]
    InvalidLength,
}

impl FromStr for Sid {
    type Err = SidDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 20 {
            return Err(SidDecodeError::InvalidLength);
        }

        let mut id = [0u8; 20];
        for (i, byte) in s.as_bytes().iter().enumerate() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => id[i] = *byte,
                _ => return Err(SidDecodeError::InvalidBase64String),
            }
        }
        Ok(Sid(id))
    }
}

impl Default for Sid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
impl Debug for Sid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for Sid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

struct SidVisitor;
impl serde::de::Visitor<'_> for SidVisitor {
    type Value = Sid;

    fn expecting(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("a 20 char url-safe base64 string")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Sid::from_str(v).map_err(serde::de::Error::custom)
    }
}
impl<'de> serde::Deserialize<'de> for Sid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(SidVisitor)
    }
}
