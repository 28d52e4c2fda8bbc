use json_ext::JsonExtError;
use json_ext::Object;
use json_ext::Path;
use json_ext::Value;
use json_ext::ValueExt;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConflictError;
use crate::error::ResolutionError;
use crate::schema::EntityType;
use crate::store::RecordStore;

/// The fields one service knows about one entity, tagged with its type and key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInstance {
    pub type_name: String,
    pub key: Object,
    /// Every known field, key fields included.
    pub fields: Object,
}

impl EntityInstance {
    pub fn new(type_name: impl Into<String>, key: Object) -> Self {
        EntityInstance {
            type_name: type_name.into(),
            fields: key.clone(),
            key,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Union the fields of `other` into `self`.
    ///
    /// Both instances must designate the same entity, and fields known to both must agree.
    /// On a conflict `self` is left untouched.
    pub fn merge(&mut self, other: EntityInstance) -> Result<(), ConflictError> {
        if self.type_name != other.type_name || self.key != other.key {
            return Err(ConflictError {
                type_name: self.type_name.clone(),
                key: Value::Object(self.key.clone()).to_string(),
                field: "key".to_string(),
            });
        }
        let mut fields = Value::Object(self.fields.clone());
        match fields.strict_merge(Value::Object(other.fields), &Path::empty()) {
            Ok(()) => {
                if let Value::Object(fields) = fields {
                    self.fields = fields;
                }
                Ok(())
            }
            Err(err) => Err(self.conflict(err)),
        }
    }

    fn conflict(&self, err: JsonExtError) -> ConflictError {
        let field = match err {
            JsonExtError::Conflict { path, field } => match path.iter().next() {
                Some(first) => first.to_string(),
                None => field,
            },
            other => other.to_string(),
        };
        ConflictError {
            type_name: self.type_name.clone(),
            key: Value::Object(self.key.clone()).to_string(),
            field,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Found(EntityInstance),
    /// No entity exists for the key. This is an answer, not an error.
    NotFound,
}

/// How a service expands a key into its local view of an entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferenceResolver {
    /// One point lookup in a store collection; the record is merged over the key.
    Lookup { collection: String },
    /// The key is the whole local view. Used by extensions that store nothing about the entity.
    Representation,
}

impl ReferenceResolver {
    pub fn lookup(collection: impl Into<String>) -> Self {
        ReferenceResolver::Lookup {
            collection: collection.into(),
        }
    }

    /// Resolve `key` to an instance of `entity`.
    ///
    /// `key` must hold exactly the declared key fields, each with a non-null scalar value.
    pub fn resolve(
        &self,
        entity: &EntityType,
        key: &Object,
        store: &dyn RecordStore,
    ) -> Result<Resolution, ResolutionError> {
        validate_key(entity, key)?;

        match self {
            ReferenceResolver::Representation => Ok(Resolution::Found(EntityInstance::new(
                entity.name.clone(),
                key.clone(),
            ))),
            ReferenceResolver::Lookup { collection } => match store.get(collection, key) {
                Some(record) => {
                    let mut instance = EntityInstance::new(entity.name.clone(), key.clone());
                    for (field, value) in record {
                        if !instance.fields.contains_key(&field) {
                            instance.fields.insert(field, value);
                        }
                    }
                    Ok(Resolution::Found(instance))
                }
                None => Ok(Resolution::NotFound),
            },
        }
    }
}

pub(crate) fn validate_key(entity: &EntityType, key: &Object) -> Result<(), ResolutionError> {
    let malformed = |reason: String| ResolutionError::MalformedReference {
        type_name: entity.name.clone(),
        reason,
    };
    for field in &entity.key {
        match key.get(field) {
            None => return Err(malformed(format!("missing key field '{field}'"))),
            Some(Value::Null | Value::Object(_) | Value::Array(_)) => {
                return Err(malformed(format!("key field '{field}' is not a scalar")))
            }
            Some(_) => {}
        }
    }
    if let Some(extra) = key.keys().find(|field| !entity.is_key(field)) {
        return Err(malformed(format!("'{extra}' is not a key field")));
    }
    Ok(())
}
