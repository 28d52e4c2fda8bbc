use indexmap::IndexMap;

use crate::error::join;
use crate::error::DeclarationError;
use crate::schema::EntityKind;
use crate::schema::EntityType;
use crate::schema::FieldDeclaration;
use crate::schema::FieldOwnership;
use crate::schema::RootField;
use crate::schema::ServiceSchema;

/// Collects the entity declarations of one service.
///
/// The registry only validates the declarations that are local to a service. Whether they agree
/// with the other services is decided by [`crate::compose`].
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    service: String,
    types: IndexMap<String, EntityType>,
    root_fields: IndexMap<String, RootField>,
}

impl EntityRegistry {
    pub fn new(service: impl Into<String>) -> Self {
        EntityRegistry {
            service: service.into(),
            types: IndexMap::new(),
            root_fields: IndexMap::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Declare an entity type owned by this service.
    pub fn declare<K, S, F>(
        &mut self,
        type_name: &str,
        key: K,
        fields: F,
    ) -> Result<&mut Self, DeclarationError>
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
        F: IntoIterator<Item = FieldDeclaration>,
    {
        self.add_type(type_name, key, fields, EntityKind::Native)
    }

    /// Declare fields this service adds to an entity type owned by another service.
    ///
    /// Key fields of an extension are external: the service receives them in references.
    pub fn extend<K, S, F>(
        &mut self,
        type_name: &str,
        key: K,
        fields: F,
    ) -> Result<&mut Self, DeclarationError>
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
        F: IntoIterator<Item = FieldDeclaration>,
    {
        self.add_type(type_name, key, fields, EntityKind::Extension)
    }

    /// Declare a root field resolved by this service.
    pub fn root_field(&mut self, field: RootField) -> Result<&mut Self, DeclarationError> {
        if self.root_fields.contains_key(&field.name) {
            return Err(DeclarationError::DuplicateRootField {
                service: self.service.clone(),
                field: field.name,
            });
        }
        self.root_fields.insert(field.name.clone(), field);
        Ok(self)
    }

    pub fn build(self) -> ServiceSchema {
        ServiceSchema {
            name: self.service,
            types: self.types,
            root_fields: self.root_fields,
        }
    }

    fn add_type<K, S, F>(
        &mut self,
        type_name: &str,
        key: K,
        fields: F,
        kind: EntityKind,
    ) -> Result<&mut Self, DeclarationError>
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
        F: IntoIterator<Item = FieldDeclaration>,
    {
        let key: Vec<String> = key.into_iter().map(Into::into).collect();

        if self.types.contains_key(type_name) {
            return Err(DeclarationError::DuplicateKeyDeclaration {
                service: self.service.clone(),
                type_name: type_name.to_string(),
                key: join(&key),
            });
        }
        if key.is_empty() {
            return Err(DeclarationError::EmptyKey {
                service: self.service.clone(),
                type_name: type_name.to_string(),
            });
        }

        let mut declared: IndexMap<String, FieldDeclaration> = IndexMap::new();
        for field in fields {
            if declared.contains_key(&field.name) {
                return Err(DeclarationError::DuplicateField {
                    service: self.service.clone(),
                    type_name: type_name.to_string(),
                    field: field.name,
                });
            }
            declared.insert(field.name.clone(), field);
        }

        for key_field in &key {
            let field =
                declared
                    .get(key_field)
                    .ok_or_else(|| DeclarationError::MissingKeyField {
                        service: self.service.clone(),
                        type_name: type_name.to_string(),
                        field: key_field.clone(),
                    })?;
            let expected = match kind {
                EntityKind::Native => FieldOwnership::Native,
                EntityKind::Extension => FieldOwnership::External,
            };
            if field.ownership != expected {
                return Err(self.invalid_ownership(
                    type_name,
                    key_field,
                    match kind {
                        EntityKind::Native => "key fields of an owned type must be native",
                        EntityKind::Extension => "key fields of an extension must be external",
                    },
                ));
            }
            if field.field_type.entity_name().is_some() {
                return Err(self.invalid_ownership(
                    type_name,
                    key_field,
                    "key fields must be scalars",
                ));
            }
        }

        for field in declared.values() {
            if field.is_external() && kind == EntityKind::Native {
                return Err(self.invalid_ownership(
                    type_name,
                    &field.name,
                    "only extensions may declare external fields",
                ));
            }
            if field.requires.is_empty() {
                continue;
            }
            if field.is_external() {
                return Err(self.invalid_ownership(
                    type_name,
                    &field.name,
                    "external fields cannot require other fields",
                ));
            }
            for required in &field.requires {
                let valid = declared
                    .get(required)
                    .map(|required| required.is_external() && !key.contains(&required.name))
                    .unwrap_or_default();
                if !valid {
                    return Err(DeclarationError::UnknownRequiredField {
                        service: self.service.clone(),
                        type_name: type_name.to_string(),
                        field: field.name.clone(),
                        required: required.clone(),
                    });
                }
            }
        }

        tracing::debug!(
            service = %self.service,
            type_name,
            kind = ?kind,
            "declared entity type"
        );
        self.types.insert(
            type_name.to_string(),
            EntityType {
                name: type_name.to_string(),
                key,
                kind,
                fields: declared,
            },
        );
        Ok(self)
    }

    fn invalid_ownership(&self, type_name: &str, field: &str, reason: &str) -> DeclarationError {
        DeclarationError::InvalidOwnership {
            service: self.service.clone(),
            type_name: type_name.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}
