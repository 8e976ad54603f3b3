//! Pipeline run identifiers.
//!
//! Runs are identified by a UUID in a *canonical* representation: **32 lowercase hexadecimal
//! characters** (no hyphens), the same value `Uuid::new_v4().simple().to_string()` produces.
//!
//! Canonical form is required for externally supplied identifiers (CLI/API input). Use
//! [`RunId::parse`] to validate one; uppercase, hyphenated, wrong-length or non-hex values are
//! rejected rather than normalised, so one run never has two spellings.

use crate::{MatchError, MatchResult};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Canonical identifier of a pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates and parses an identifier that must already be canonical.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::InvalidInput`] if `input` is not in canonical form.
    pub fn parse(input: &str) -> MatchResult<Self> {
        if !Self::is_canonical(input) {
            return Err(MatchError::InvalidInput(format!(
                "run id must be 32 lowercase hex characters without hyphens, got: '{}'",
                input
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| MatchError::InvalidInput(format!("invalid run id '{input}': {e}")))
    }

    /// Returns `true` if `input` is exactly 32 lowercase hex characters.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32 && input.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for RunId {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunId::parse(s)
    }
}

impl serde::Serialize for RunId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for RunId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RunId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_canonical_id() {
        let id = RunId::new().to_string();
        assert_eq!(id.len(), 32);
        assert!(RunId::is_canonical(&id));
    }

    #[test]
    fn parse_round_trips_canonical_id() {
        let canonical = "550e8400e29b41d4a716446655440000";
        assert_eq!(RunId::parse(canonical).unwrap().to_string(), canonical);
    }

    #[test]
    fn parse_rejects_hyphenated_id() {
        match RunId::parse("550e8400-e29b-41d4-a716-446655440000") {
            Err(MatchError::InvalidInput(msg)) => {
                assert!(msg.contains("32 lowercase hex characters"));
            }
            other => panic!("Expected InvalidInput error, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_uppercase_and_bad_lengths() {
        assert!(RunId::parse("550E8400E29B41D4A716446655440000").is_err());
        assert!(RunId::parse("550e8400e29b41d4a71644665544000").is_err());
        assert!(RunId::parse("550e8400e29b41d4a7164466554400000").is_err());
        assert!(RunId::parse("550e8400e29b41d4a716446655440zzz").is_err());
    }
}
