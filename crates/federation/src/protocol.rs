//! The request and response shapes exchanged between the gateway and a service.
//!
//! Entity fetches carry representations: the key fields of each entity, plus the external fields
//! the requested fields require. This is the only way services learn about each other's data.

use json_ext::Object;
use json_ext::Path;
use json_ext::Value;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ResolutionError;
use crate::schema::OperationKind;
use crate::selection::SelectionSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubgraphRequest {
    /// Resolve root fields.
    #[serde(rename_all = "camelCase")]
    Root {
        operation: OperationKind,
        selections: SelectionSet,
    },
    /// Resolve fields on the entities designated by `representations`.
    #[serde(rename_all = "camelCase")]
    Entities {
        type_name: String,
        representations: Vec<Object>,
        selections: SelectionSet,
    },
}

impl SubgraphRequest {
    pub fn selections(&self) -> &SelectionSet {
        match self {
            SubgraphRequest::Root { selections, .. } => selections,
            SubgraphRequest::Entities { selections, .. } => selections,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubgraphErrorKind {
    NotFound,
    MalformedReference,
    Resolver,
}

/// An error reported by a service for one position of its response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubgraphError {
    pub message: String,
    /// Relative to the service response: `[index, ...]` for entity fetches, `[field, ...]` for
    /// root fetches.
    #[serde(default)]
    pub path: Path,
    pub kind: SubgraphErrorKind,
}

impl SubgraphError {
    pub fn new(error: &ResolutionError, path: Path) -> Self {
        let kind = match error {
            ResolutionError::NotFound { .. } => SubgraphErrorKind::NotFound,
            ResolutionError::MalformedReference { .. } => SubgraphErrorKind::MalformedReference,
            _ => SubgraphErrorKind::Resolver,
        };
        SubgraphError {
            message: error.to_string(),
            path,
            kind,
        }
    }
}

/// A service response.
///
/// For root requests `data` is an object keyed by response name. For entity requests it is a
/// list aligned with the representations, holding `null` where an entity could not be resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubgraphResponse {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SubgraphError>,
}

impl SubgraphResponse {
    pub fn new(data: Value) -> Self {
        SubgraphResponse {
            data,
            errors: Vec::new(),
        }
    }
}
