//! Tuple types and the encoder that maps domain identifiers onto the
//! `"type:id"` strings the authorization graph stores.
//!
//! Identifiers are escaped before they are embedded, so an id containing
//! `:`, `#` or whitespace cannot forge a different object or userset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Object type for end users.
pub const USER_TYPE: &str = "user";
/// Object type for client applications.
pub const CLIENT_TYPE: &str = "client";
/// Object type for groups.
pub const GROUP_TYPE: &str = "group";

/// Relation granting access to a client application.
pub const CAN_ACCESS: &str = "can_access";
/// Relation linking a user to a group.
pub const MEMBER: &str = "member";

/// A `(user, relation, object)` triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tuple {
    /// Subject, e.g. `user:alice` or `group:eng#member`.
    pub user: String,
    /// Relation name.
    pub relation: String,
    /// Object, e.g. `client:42`.
    pub object: String,
}

impl Tuple {
    /// Creates a tuple.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }

    /// `(group:G#member, can_access, client:C)`.
    #[must_use]
    pub fn group_can_access(group_id: &str, client_id: &str) -> Self {
        Self::new(
            group_member_tuple(group_id),
            CAN_ACCESS,
            client_tuple(client_id),
        )
    }

    /// `(user:U, member, group:G)`.
    #[must_use]
    pub fn user_member_of(user_id: &str, group_id: &str) -> Self {
        Self::new(user_tuple(user_id), MEMBER, group_tuple(group_id))
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// A tuple to check together with the contextual tuples that hold only for
/// the duration of that check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleWithContext {
    /// The tuple being checked.
    pub tuple: Tuple,
    /// Contextual tuples, in the order they are sent.
    pub contextual_tuples: Vec<Tuple>,
}

impl TupleWithContext {
    /// Creates a check request.
    #[must_use]
    pub fn new(tuple: Tuple, contextual_tuples: Vec<Tuple>) -> Self {
        Self {
            tuple,
            contextual_tuples,
        }
    }
}

/// A tuple returned by a read, with the time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTuple {
    /// The tuple key.
    pub key: Tuple,
    /// When the tuple was written.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Returns `user:<id>`.
#[must_use]
pub fn user_tuple(id: &str) -> String {
    typed(USER_TYPE, id)
}

/// Returns `client:<id>`.
#[must_use]
pub fn client_tuple(id: &str) -> String {
    typed(CLIENT_TYPE, id)
}

/// Returns `group:<id>`.
#[must_use]
pub fn group_tuple(id: &str) -> String {
    typed(GROUP_TYPE, id)
}

/// Returns `group:<id>#member`.
#[must_use]
pub fn group_member_tuple(id: &str) -> String {
    format!("{}#{MEMBER}", group_tuple(id))
}

fn typed(object_type: &str, id: &str) -> String {
    format!("{object_type}:{}", escape_id(id))
}

/// Percent-encodes the characters that carry meaning in tuple strings.
///
/// `%`, `:`, `#`, `@`, `/`, whitespace and control characters are encoded as
/// their UTF-8 bytes in `%XX` form. Everything else passes through.
#[must_use]
pub fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for ch in id.chars() {
        if needs_escape(ch) {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn needs_escape(ch: char) -> bool {
    matches!(ch, '%' | ':' | '#' | '@' | '/') || ch.is_whitespace() || ch.is_control()
}

/// Reverses [`escape_id`].
///
/// Returns `None` for a truncated or non-hex escape, or when the decoded
/// bytes are not UTF-8.
#[must_use]
pub fn unescape_id(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Splits `type:id` into its type and unescaped id.
///
/// A userset suffix (`#relation`) is not accepted here.
#[must_use]
pub fn parse_object(object: &str) -> Option<(&str, String)> {
    let (object_type, id) = object.split_once(':')?;
    if object_type.is_empty() || id.is_empty() || id.contains('#') {
        return None;
    }
    Some((object_type, unescape_id(id)?))
}

/// Extracts the group id from a `group:<id>#member` userset.
#[must_use]
pub fn parse_group_member(user: &str) -> Option<String> {
    let object = user.strip_suffix(&format!("#{MEMBER}"))?;
    match parse_object(object)? {
        (GROUP_TYPE, id) => Some(id),
        _ => None,
    }
}
