use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::schema::ArgumentDeclaration;
use crate::schema::FieldType;
use crate::schema::OperationKind;

/// A field of the composed graph.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedField {
    pub name: String,
    pub field_type: FieldType,
    /// The single service that resolves this field.
    pub owner: String,
    /// Services that reference this field without resolving it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_in: Vec<String>,
    /// Fields of the same type the owner needs before it can resolve this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
}

/// An entity type of the composed graph, merged from every service that declares it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedType {
    pub name: String,
    pub key: Vec<String>,
    /// The service holding the native declaration.
    pub owner: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extended_by: Vec<String>,
    pub fields: IndexMap<String, ComposedField>,
}

impl ComposedType {
    pub fn field(&self, name: &str) -> Option<&ComposedField> {
        self.fields.get(name)
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key.iter().any(|key| key == name)
    }

    /// Whether `service` declares this type, natively or as an extension.
    pub fn is_declared_by(&self, service: &str) -> bool {
        self.owner == service || self.extended_by.iter().any(|s| s == service)
    }

    /// Whether `service` can produce `field` for an instance of this type.
    ///
    /// Every declaring service knows the key; other fields are only resolvable by their owner.
    pub fn is_resolvable_in(&self, field: &str, service: &str) -> bool {
        match self.fields.get(field) {
            Some(composed) if composed.owner == service => true,
            Some(_) => self.is_key(field) && self.is_declared_by(service),
            None => false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedRootField {
    pub name: String,
    pub service: String,
    pub operation: OperationKind,
    pub returns: FieldType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ArgumentDeclaration>,
}

/// `consumer` references `type_name.field`, which `owner` resolves.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiresEdge {
    pub type_name: String,
    pub field: String,
    pub consumer: String,
    pub owner: String,
}

/// The graph served by the gateway.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedSchema {
    pub services: Vec<String>,
    pub types: IndexMap<String, ComposedType>,
    pub root_fields: IndexMap<String, ComposedRootField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_edges: Vec<RequiresEdge>,
}

impl ComposedSchema {
    pub fn entity(&self, name: &str) -> Option<&ComposedType> {
        self.types.get(name)
    }

    pub fn root_field(&self, name: &str) -> Option<&ComposedRootField> {
        self.root_fields.get(name)
    }

    /// The service resolving `type_name.field`.
    pub fn owner_of(&self, type_name: &str, field: &str) -> Option<&str> {
        self.entity(type_name)
            .and_then(|entity| entity.field(field))
            .map(|field| field.owner.as_str())
    }
}
