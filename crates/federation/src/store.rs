use std::collections::HashMap;
use std::fmt::Debug;

use indexmap::IndexMap;
use json_ext::Object;
use json_ext::Value;
use parking_lot::RwLock;

use crate::error::StoreError;

/// A stored row.
pub type Record = Object;

/// Equality conditions plus an optional limit, for [`RecordStore::find`].
#[derive(Clone, Debug, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| record.get(field) == Some(value))
    }
}

/// The persistence collaborator of a service.
///
/// Stores are scoped per collection, which is usually named after the entity type it holds.
pub trait RecordStore: Send + Sync + Debug {
    /// Point lookup by key.
    fn get(&self, collection: &str, key: &Object) -> Option<Record>;

    fn find(&self, collection: &str, filter: &Filter) -> Vec<Record>;

    /// Insert a record and return it as stored.
    fn create(&self, collection: &str, fields: Object) -> Result<Record, StoreError>;
}

#[derive(Debug, Default)]
struct Collection {
    key: Vec<String>,
    rows: IndexMap<String, Record>,
    next_id: u64,
}

impl Collection {
    fn fingerprint(&self, key: &Object) -> Option<String> {
        let values = self
            .key
            .iter()
            .map(|field| key.get(field).map(Value::to_string))
            .collect::<Option<Vec<_>>>()?;
        Some(values.join("|"))
    }
}

/// A keyed in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty collection keyed by `key`.
    pub fn with_collection<K, S>(self, name: &str, key: K) -> Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections.write().insert(
            name.to_string(),
            Collection {
                key: key.into_iter().map(Into::into).collect(),
                rows: IndexMap::new(),
                next_id: 1,
            },
        );
        self
    }

    /// Insert every record, failing on the first rejected one.
    pub fn seed(
        &self,
        collection: &str,
        records: impl IntoIterator<Item = Value>,
    ) -> Result<(), StoreError> {
        for record in records {
            if let Value::Object(record) = record {
                self.create(collection, record)?;
            }
        }
        Ok(())
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|collection| collection.rows.len())
            .unwrap_or_default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, collection: &str, key: &Object) -> Option<Record> {
        let collections = self.collections.read();
        let collection = collections.get(collection)?;
        let fingerprint = collection.fingerprint(key)?;
        collection.rows.get(&fingerprint).cloned()
    }

    fn find(&self, collection: &str, filter: &Filter) -> Vec<Record> {
        let collections = self.collections.read();
        let Some(collection) = collections.get(collection) else {
            return Vec::new();
        };
        collection
            .rows
            .values()
            .filter(|record| filter.matches(record))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    fn create(&self, name: &str, mut fields: Object) -> Result<Record, StoreError> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))?;

        // a single missing key field is generated, as an auto-increment id would be
        if let [key] = collection.key.as_slice() {
            if !fields.contains_key(key) {
                let id = collection.next_id;
                fields.insert(key.clone(), Value::String(id.to_string()));
            }
        }
        for key in &collection.key {
            if !fields.contains_key(key) {
                return Err(StoreError::MissingKey {
                    collection: name.to_string(),
                    field: key.clone(),
                });
            }
        }

        let fingerprint = collection
            .fingerprint(&fields)
            .ok_or_else(|| StoreError::MissingKey {
                collection: name.to_string(),
                field: collection.key.join(", "),
            })?;
        if collection.rows.contains_key(&fingerprint) {
            return Err(StoreError::DuplicateKey {
                collection: name.to_string(),
                key: fingerprint,
            });
        }

        collection.next_id = collection.next_id.max(numeric_id(&collection.key, &fields) + 1);
        collection.rows.insert(fingerprint, fields.clone());
        Ok(fields)
    }
}

fn numeric_id(key: &[String], fields: &Object) -> u64 {
    match key {
        [key] => match fields.get(key) {
            Some(Value::String(id)) => id.parse().unwrap_or_default(),
            Some(Value::Number(id)) => id.as_u64().unwrap_or_default(),
            _ => 0,
        },
        _ => 0,
    }
}
