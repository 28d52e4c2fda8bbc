//! Service schema descriptors.
//!
//! These are plain data: a service publishes a [`ServiceSchema`] to the composer, and nothing in
//! here holds a resolver or touches a store.

use std::fmt;

use indexmap::IndexMap;
use json_ext::Value;
use serde::Deserialize;
use serde::Serialize;

/// Scalar leaf types.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    #[serde(rename = "ID")]
    Id,
    String,
    Int,
    Float,
    Boolean,
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scalar::Id => "ID",
            Scalar::String => "String",
            Scalar::Int => "Int",
            Scalar::Float => "Float",
            Scalar::Boolean => "Boolean",
        })
    }
}

/// The type of a field or root field.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Scalar(Scalar),
    /// A relation to an entity type, by name.
    Entity(String),
    List(Box<FieldType>),
}

impl FieldType {
    pub fn id() -> Self {
        FieldType::Scalar(Scalar::Id)
    }

    pub fn string() -> Self {
        FieldType::Scalar(Scalar::String)
    }

    pub fn int() -> Self {
        FieldType::Scalar(Scalar::Int)
    }

    pub fn float() -> Self {
        FieldType::Scalar(Scalar::Float)
    }

    pub fn boolean() -> Self {
        FieldType::Scalar(Scalar::Boolean)
    }

    pub fn entity(name: impl Into<String>) -> Self {
        FieldType::Entity(name.into())
    }

    pub fn list(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    /// The entity this type points at, looking through lists.
    pub fn entity_name(&self) -> Option<&str> {
        match self {
            FieldType::Scalar(_) => None,
            FieldType::Entity(name) => Some(name),
            FieldType::List(inner) => inner.entity_name(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(scalar) => scalar.fmt(f),
            FieldType::Entity(name) => f.write_str(name),
            FieldType::List(inner) => write!(f, "[{inner}]"),
        }
    }
}

/// Whether a service resolves a field itself or only references it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldOwnership {
    Native,
    /// A placeholder for a field resolved by the type's owner.
    External,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDeclaration {
    pub name: String,
    pub field_type: FieldType,
    pub ownership: FieldOwnership,
    /// External fields of the same type that must be supplied before this field resolves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
}

impl FieldDeclaration {
    pub fn native(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldDeclaration {
            name: name.into(),
            field_type,
            ownership: FieldOwnership::Native,
            requires: Vec::new(),
        }
    }

    pub fn external(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldDeclaration {
            name: name.into(),
            field_type,
            ownership: FieldOwnership::External,
            requires: Vec::new(),
        }
    }

    pub fn requires<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_external(&self) -> bool {
        self.ownership == FieldOwnership::External
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// The service owns the type and can resolve it from its key.
    Native,
    /// The service adds fields to a type owned elsewhere.
    Extension,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    pub name: String,
    pub key: Vec<String>,
    pub kind: EntityKind,
    pub fields: IndexMap<String, FieldDeclaration>,
}

impl EntityType {
    pub fn field(&self, name: &str) -> Option<&FieldDeclaration> {
        self.fields.get(name)
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key.iter().any(|key| key == name)
    }

    pub fn is_native(&self) -> bool {
        self.kind == EntityKind::Native
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Query,
    Mutation,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl ArgumentDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        ArgumentDeclaration {
            name: name.into(),
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// An entry point of the graph, such as `user(id)` or `addUser(input)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootField {
    pub name: String,
    pub operation: OperationKind,
    pub returns: FieldType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ArgumentDeclaration>,
}

impl RootField {
    pub fn query(name: impl Into<String>, returns: FieldType) -> Self {
        RootField {
            name: name.into(),
            operation: OperationKind::Query,
            returns,
            arguments: Vec::new(),
        }
    }

    pub fn mutation(name: impl Into<String>, returns: FieldType) -> Self {
        RootField {
            name: name.into(),
            operation: OperationKind::Mutation,
            returns,
            arguments: Vec::new(),
        }
    }

    pub fn argument(mut self, argument: ArgumentDeclaration) -> Self {
        self.arguments.push(argument);
        self
    }
}

/// Everything a service publishes to the composer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSchema {
    pub name: String,
    pub types: IndexMap<String, EntityType>,
    pub root_fields: IndexMap<String, RootField>,
}

impl ServiceSchema {
    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.types.get(name)
    }

    pub fn root_field(&self, name: &str) -> Option<&RootField> {
        self.root_fields.get(name)
    }
}
