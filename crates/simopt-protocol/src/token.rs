use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Opaque 128-bit identifier for cases and variables.
///
/// Tokens are plain values: they are `Copy`, totally ordered and hashable, so
/// they can key a `BTreeMap` directly. The text form is 32 lowercase hex digits
/// and is also the serde representation, which keeps tokens usable as JSON map
/// keys and guarantees a byte-for-byte round trip.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(u128);

impl Token {
    /// Draws a fresh random token.
    pub fn generate() -> Self {
        loop {
            let raw = fastrand::u128(..);
            if raw != 0 {
                return Self(raw);
            }
        }
    }

    pub const fn nil() -> Self {
        Self(0)
    }

    pub const fn from_u128(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(8);
        s
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid token '{input}': expected 32 hex digits")]
pub struct ParseTokenError {
    pub input: String,
}

impl FromStr for Token {
    type Err = ParseTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTokenError {
            input: s.to_string(),
        };
        let decoded = hex::decode(s).map_err(|_| err())?;
        let bytes: [u8; 16] = decoded.try_into().map_err(|_| err())?;
        Ok(Self::from_bytes(bytes))
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct TokenVisitor;

impl Visitor<'_> for TokenVisitor {
    type Value = Token;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a 32 digit hex token")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Token, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(TokenVisitor)
    }
}
