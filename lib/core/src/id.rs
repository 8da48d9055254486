//! Strongly-typed identifiers.
//!
//! Groups are owned by this system and use ULIDs. Users and applications
//! come from the identity provider and stay opaque strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Unique identifier for a group.
///
/// Displays as `grp_<ULID>`; parsing accepts the prefixed or the bare form.
/// Ordering follows the ULID, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Ulid);

impl GroupId {
    const PREFIX: &'static str = "grp";

    /// Creates a new ID with a randomly generated ULID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates an ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for GroupId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(s);

        Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
            id_type: "GroupId",
            reason: e.to_string(),
        })
    }
}

impl From<Ulid> for GroupId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_display_has_prefix() {
        let id = GroupId::new();
        assert!(id.to_string().starts_with("grp_"));
    }

    #[test]
    fn parse_with_and_without_prefix() {
        let id = GroupId::new();
        let prefixed: GroupId = id.to_string().parse().expect("should parse");
        let bare: GroupId = id.as_ulid().to_string().parse().expect("should parse");
        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "grp_not-a-ulid".parse::<GroupId>().unwrap_err();
        assert_eq!(err.id_type, "GroupId");
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let id = GroupId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
        let back: GroupId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
