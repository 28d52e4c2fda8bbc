use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while a service declares its entities.
///
/// These are fatal at service startup: a service with an invalid declaration never publishes a
/// schema.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub enum DeclarationError {
    /// Type '{type_name}' with key ({key}) is declared twice in service '{service}'.
    DuplicateKeyDeclaration {
        service: String,
        type_name: String,
        key: String,
    },

    /// Key field '{field}' of type '{type_name}' is not declared in service '{service}'.
    MissingKeyField {
        service: String,
        type_name: String,
        field: String,
    },

    /// Type '{type_name}' in service '{service}' declares an empty key.
    EmptyKey { service: String, type_name: String },

    /// Field '{type_name}.{field}' is declared twice in service '{service}'.
    DuplicateField {
        service: String,
        type_name: String,
        field: String,
    },

    /// Field '{type_name}.{field}' in service '{service}' has invalid ownership: {reason}
    InvalidOwnership {
        service: String,
        type_name: String,
        field: String,
        reason: String,
    },

    /// Field '{type_name}.{field}' in service '{service}' requires '{required}' which is not an external field of the type.
    UnknownRequiredField {
        service: String,
        type_name: String,
        field: String,
        required: String,
    },

    /// Root field '{field}' is declared twice in service '{service}'.
    DuplicateRootField { service: String, field: String },

    /// Service '{service}' registers a resolver for '{target}' which it does not declare.
    UndeclaredResolver { service: String, target: String },

    /// Root field '{field}' of service '{service}' has no resolver.
    MissingRootResolver { service: String, field: String },
}

/// Errors raised by the schema composer.
///
/// Composition errors are fatal at gateway startup: the graph does not serve traffic until they
/// are fixed.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositionError {
    /// Type '{type_name}' is extended by [{consumers}] but no service declares it as native.
    UnownedType {
        type_name: String,
        consumers: String,
    },

    /// Type '{type_name}' is declared as native by more than one service: [{services}].
    AmbiguousOwnership { type_name: String, services: String },

    /// Service '{service}' declares '{type_name}' inconsistently with its owner '{owner}': {reason}
    KeyMismatch {
        type_name: String,
        service: String,
        owner: String,
        reason: String,
    },

    /// Field '{type_name}.{field}' is natively resolved by more than one service: [{services}].
    AmbiguousFieldOwnership {
        type_name: String,
        field: String,
        services: String,
    },

    /// External field '{type_name}.{field}' of service '{service}' is not resolvable by any service.
    UnresolvableExternalField {
        type_name: String,
        field: String,
        service: String,
    },

    /// Root field '{field}' is exposed by more than one service: [{services}].
    DuplicateRootField { field: String, services: String },

    /// Type '{type_name}' referenced by '{referenced_by}' is not declared by any service.
    UnknownType {
        type_name: String,
        referenced_by: String,
    },

    /// Fields [{fields}] of type '{type_name}' depend on each other to be resolved.
    CircularDependency { type_name: String, fields: String },
}

impl CompositionError {
    pub fn code(&self) -> &'static str {
        match self {
            CompositionError::UnownedType { .. } => "UNOWNED_TYPE",
            CompositionError::AmbiguousOwnership { .. } => "AMBIGUOUS_OWNERSHIP",
            CompositionError::KeyMismatch { .. } => "KEY_MISMATCH",
            CompositionError::AmbiguousFieldOwnership { .. } => "AMBIGUOUS_FIELD_OWNERSHIP",
            CompositionError::UnresolvableExternalField { .. } => "UNRESOLVABLE_EXTERNAL_FIELD",
            CompositionError::DuplicateRootField { .. } => "DUPLICATE_ROOT_FIELD",
            CompositionError::UnknownType { .. } => "UNKNOWN_TYPE",
            CompositionError::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
        }
    }
}

/// Errors raised while a service resolves a reference or a field.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionError {
    /// Malformed reference to '{type_name}': {reason}
    MalformedReference { type_name: String, reason: String },

    /// Type '{type_name}' is not declared by service '{service}'.
    UnknownType { service: String, type_name: String },

    /// No '{type_name}' found for key {key}.
    NotFound { type_name: String, key: String },

    /// Field '{type_name}.{field}' is not resolvable by service '{service}'.
    UnknownField {
        service: String,
        type_name: String,
        field: String,
    },

    /// Resolver for '{target}' failed: {reason}
    Resolver { target: String, reason: String },
}

impl ResolutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ResolutionError::MalformedReference { .. } => "MALFORMED_REFERENCE",
            ResolutionError::UnknownType { .. } => "UNKNOWN_TYPE",
            ResolutionError::NotFound { .. } => "NOT_FOUND",
            ResolutionError::UnknownField { .. } => "UNKNOWN_FIELD",
            ResolutionError::Resolver { .. } => "RESOLVER",
        }
    }
}

/// Errors raised by a record store.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub enum StoreError {
    /// Unknown collection '{0}'.
    UnknownCollection(String),

    /// Record for collection '{collection}' is missing key field '{field}'.
    MissingKey { collection: String, field: String },

    /// A record with key {key} already exists in collection '{collection}'.
    DuplicateKey { collection: String, key: String },
}

impl From<StoreError> for ResolutionError {
    fn from(err: StoreError) -> Self {
        let target = match &err {
            StoreError::UnknownCollection(collection)
            | StoreError::MissingKey { collection, .. }
            | StoreError::DuplicateKey { collection, .. } => collection.clone(),
        };
        ResolutionError::Resolver {
            target,
            reason: err.to_string(),
        }
    }
}

pub(crate) fn join(items: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    items
        .into_iter()
        .map(|item| item.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Conflicting values for '{type_name}.{field}' of the instance with key {key}.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConflictError {
    pub type_name: String,
    pub key: String,
    pub field: String,
}
