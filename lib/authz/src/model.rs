//! Authorization model handling.
//!
//! The model this crate enforces is embedded at build time. At startup the
//! remote store's model is compared structurally against it; ids, ordering
//! and metadata the service adds on its own are ignored.

use crate::error::AuthzError;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Versions of the authorization model shipped with this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelVersion {
    /// Users and group members may access clients.
    #[default]
    V0,
}

impl ModelVersion {
    /// Returns the version tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0 => "v0",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Self::V0 => include_str!("../models/v0.json"),
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An authorization model in the service's JSON representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationModel {
    /// Identifier assigned by the service; absent for embedded models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Modeling language schema version.
    pub schema_version: String,
    /// Type definitions.
    pub type_definitions: Vec<TypeDefinition>,
}

/// A single type in the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Relation name to rewrite definition.
    #[serde(default)]
    pub relations: Option<BTreeMap<String, serde_json::Value>>,
    /// Type restrictions for directly assignable relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TypeMetadata>,
}

/// Metadata attached to a type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMetadata {
    /// Per-relation metadata.
    #[serde(default)]
    pub relations: Option<BTreeMap<String, RelationMetadata>>,
}

/// Metadata for one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMetadata {
    /// User types that may be written directly on the relation.
    #[serde(default)]
    pub directly_related_user_types: Option<Vec<RelationReference>>,
}

/// A user type allowed on a relation, e.g. `user`, `group#member`, `user:*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationReference {
    /// Type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Userset relation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Present for public (`type:*`) access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<serde_json::Value>,
    /// Condition name, if the relation is conditional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl RelationReference {
    fn canonical(&self) -> String {
        let mut out = self.type_name.clone();
        if self.wildcard.is_some() {
            out.push_str(":*");
        }
        if let Some(relation) = self.relation.as_deref().filter(|r| !r.is_empty()) {
            out.push('#');
            out.push_str(relation);
        }
        if let Some(condition) = self.condition.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(" with ");
            out.push_str(condition);
        }
        out
    }
}

#[derive(Debug, PartialEq)]
struct RelationShape<'a> {
    rewrite: &'a serde_json::Value,
    allowed: BTreeSet<String>,
}

type ModelShape<'a> = BTreeMap<&'a str, BTreeMap<&'a str, RelationShape<'a>>>;

impl AuthorizationModel {
    /// Parses a model from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, Report<AuthzError>> {
        serde_json::from_str(json).map_err(|e| {
            AuthzError::InvalidInput {
                details: format!("authorization model is not valid JSON: {e}"),
            }
            .into()
        })
    }

    /// Loads the embedded model for a version.
    pub fn embedded(version: ModelVersion) -> Result<Self, Report<AuthzError>> {
        Self::from_json(version.source())
    }

    /// Returns true when `other` describes the same types and relations.
    #[must_use]
    pub fn matches(&self, other: &AuthorizationModel) -> bool {
        self.difference(other).is_none()
    }

    /// Describes the first structural difference from `other`, if any.
    #[must_use]
    pub fn difference(&self, other: &AuthorizationModel) -> Option<String> {
        if self.schema_version != other.schema_version {
            return Some(format!(
                "schema version '{}' differs from expected '{}'",
                other.schema_version, self.schema_version
            ));
        }

        let expected = self.shape();
        let actual = other.shape();

        for (type_name, relations) in &expected {
            let Some(actual_relations) = actual.get(type_name) else {
                return Some(format!("type '{type_name}' is missing"));
            };
            for (relation, shape) in relations {
                match actual_relations.get(relation) {
                    None => {
                        return Some(format!(
                            "type '{type_name}' is missing relation '{relation}'"
                        ));
                    }
                    Some(found) if found.rewrite != shape.rewrite => {
                        return Some(format!(
                            "relation '{type_name}#{relation}' has a different definition"
                        ));
                    }
                    Some(found) if found.allowed != shape.allowed => {
                        return Some(format!(
                            "relation '{type_name}#{relation}' allows {:?}, expected {:?}",
                            found.allowed, shape.allowed
                        ));
                    }
                    Some(_) => {}
                }
            }
            if let Some(extra) = actual_relations.keys().find(|r| !relations.contains_key(*r)) {
                return Some(format!(
                    "type '{type_name}' has unexpected relation '{extra}'"
                ));
            }
        }

        actual
            .keys()
            .find(|t| !expected.contains_key(*t))
            .map(|extra| format!("unexpected type '{extra}'"))
    }

    fn shape(&self) -> ModelShape<'_> {
        let mut shape = BTreeMap::new();
        for def in &self.type_definitions {
            let metadata = def.metadata.as_ref().and_then(|m| m.relations.as_ref());
            let mut relations = BTreeMap::new();
            for (name, rewrite) in def.relations.iter().flatten() {
                let allowed = metadata
                    .and_then(|m| m.get(name))
                    .and_then(|m| m.directly_related_user_types.as_ref())
                    .map(|refs| refs.iter().map(RelationReference::canonical).collect())
                    .unwrap_or_default();
                relations.insert(name.as_str(), RelationShape { rewrite, allowed });
            }
            shape.insert(def.type_name.as_str(), relations);
        }
        shape
    }

    /// Returns the user types directly assignable on `type_name#relation`.
    #[must_use]
    pub fn allowed_user_types(&self, type_name: &str, relation: &str) -> Vec<String> {
        self.shape()
            .get(type_name)
            .and_then(|relations| relations.get(relation))
            .map(|shape| shape.allowed.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v0() -> AuthorizationModel {
        AuthorizationModel::embedded(ModelVersion::V0).expect("embedded model parses")
    }

    #[test]
    fn embedded_v0_defines_client_access() {
        let model = v0();
        assert_eq!(model.schema_version, "1.1");
        assert_eq!(
            model.allowed_user_types("client", "can_access"),
            vec!["group#member".to_string(), "user".to_string()]
        );
        assert_eq!(model.allowed_user_types("group", "member"), vec!["user"]);
    }

    #[test]
    fn remote_copy_with_id_and_extra_metadata_matches() {
        let mut remote: serde_json::Value =
            serde_json::from_str(ModelVersion::V0.source()).expect("json");
        remote["id"] = json!("01HZX0AUTHMODEL");
        remote["conditions"] = json!({});
        remote["type_definitions"][1]["metadata"]["module"] = json!("");
        remote["type_definitions"][0]["relations"] = json!(null);
        remote["type_definitions"]
            .as_array_mut()
            .expect("array")
            .reverse();

        let remote: AuthorizationModel = serde_json::from_value(remote).expect("model");
        assert!(v0().matches(&remote));
    }

    #[test]
    fn missing_can_access_is_a_mismatch() {
        let mut remote = v0();
        for def in &mut remote.type_definitions {
            if def.type_name == "client" {
                def.relations = Some(BTreeMap::new());
            }
        }

        let diff = v0().difference(&remote).expect("should differ");
        assert!(diff.contains("can_access"), "{diff}");
    }

    #[test]
    fn different_user_types_are_a_mismatch() {
        let remote = AuthorizationModel::from_json(
            &json!({
                "schema_version": "1.1",
                "type_definitions": [
                    {"type": "user", "relations": {}},
                    {"type": "group", "relations": {"member": {"this": {}}},
                     "metadata": {"relations": {"member": {"directly_related_user_types": [{"type": "user"}]}}}},
                    {"type": "client", "relations": {"can_access": {"this": {}}},
                     "metadata": {"relations": {"can_access": {"directly_related_user_types": [{"type": "user", "wildcard": {}}]}}}}
                ]
            })
            .to_string(),
        )
        .expect("model");

        let diff = v0().difference(&remote).expect("should differ");
        assert!(diff.contains("user:*"), "{diff}");
    }

    #[test]
    fn extra_type_and_schema_version_are_mismatches() {
        let mut remote = v0();
        remote.type_definitions.push(TypeDefinition {
            type_name: "document".to_string(),
            relations: None,
            metadata: None,
        });
        assert_eq!(
            v0().difference(&remote).as_deref(),
            Some("unexpected type 'document'")
        );

        let mut remote = v0();
        remote.schema_version = "1.2".to_string();
        assert!(!v0().matches(&remote));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = AuthorizationModel::from_json("{not json").unwrap_err();
        assert!(matches!(
            err.current_context(),
            AuthzError::InvalidInput { .. }
        ));
    }
}
