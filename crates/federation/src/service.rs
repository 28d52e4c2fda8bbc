use std::collections::HashMap;
use std::sync::Arc;

use derivative::Derivative;
use json_ext::Object;
use json_ext::Path;
use json_ext::PathElement;
use json_ext::Value;

use crate::error::DeclarationError;
use crate::error::ResolutionError;
use crate::protocol::SubgraphError;
use crate::protocol::SubgraphRequest;
use crate::protocol::SubgraphResponse;
use crate::resolver::EntityInstance;
use crate::resolver::ReferenceResolver;
use crate::resolver::Resolution;
use crate::schema::EntityKind;
use crate::schema::EntityType;
use crate::schema::FieldType;
use crate::schema::OperationKind;
use crate::schema::ServiceSchema;
use crate::selection::Field;
use crate::store::RecordStore;

/// Computes a field that is not stored on the entity, from the entity's local view.
pub type FieldResolver = Arc<
    dyn Fn(&EntityInstance, &Object, &dyn RecordStore) -> Result<Value, ResolutionError>
        + Send
        + Sync,
>;

/// Resolves a root field from its arguments.
pub type RootResolver =
    Arc<dyn Fn(&Object, &dyn RecordStore) -> Result<Value, ResolutionError> + Send + Sync>;

const TYPENAME: &str = "__typename";

/// A running service: its published schema, its store, and the resolvers behind them.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Service {
    schema: Arc<ServiceSchema>,
    store: Arc<dyn RecordStore>,
    reference_resolvers: HashMap<String, ReferenceResolver>,
    #[derivative(Debug = "ignore")]
    field_resolvers: HashMap<(String, String), FieldResolver>,
    #[derivative(Debug = "ignore")]
    root_resolvers: HashMap<String, RootResolver>,
}

impl Service {
    pub fn builder(schema: ServiceSchema, store: Arc<dyn RecordStore>) -> ServiceBuilder {
        ServiceBuilder {
            schema,
            store,
            reference_resolvers: HashMap::new(),
            field_resolvers: HashMap::new(),
            root_resolvers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &ServiceSchema {
        &self.schema
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Expand a key into this service's view of an entity.
    pub fn resolve_reference(
        &self,
        type_name: &str,
        key: &Object,
    ) -> Result<Resolution, ResolutionError> {
        let entity = self.entity(type_name)?;
        let resolver = self
            .reference_resolvers
            .get(type_name)
            .ok_or_else(|| self.unknown_type(type_name))?;
        resolver.resolve(entity, key, self.store.as_ref())
    }

    /// Answer a request from the gateway.
    ///
    /// Resolution errors are scoped to the position they occur at: the value there becomes
    /// `null` and an error is recorded, the rest of the response is still produced.
    pub fn execute(&self, request: &SubgraphRequest) -> SubgraphResponse {
        let mut errors = Vec::new();
        let data = match request {
            SubgraphRequest::Root {
                operation,
                selections,
            } => {
                let mut data = Object::new();
                for field in selections {
                    let path = Path::empty().key(field.response_name());
                    let value = self
                        .execute_root_field(*operation, field, &path, &mut errors)
                        .unwrap_or_else(|err| {
                            errors.push(SubgraphError::new(&err, path.clone()));
                            Value::Null
                        });
                    data.insert(field.response_name().to_string(), value);
                }
                Value::Object(data)
            }
            SubgraphRequest::Entities {
                type_name,
                representations,
                selections,
            } => Value::Array(
                representations
                    .iter()
                    .enumerate()
                    .map(|(index, representation)| {
                        let path = Path(vec![PathElement::Index(index)]);
                        self.execute_entity(type_name, representation, selections, &path, &mut errors)
                            .unwrap_or_else(|err| {
                                errors.push(SubgraphError::new(&err, path.clone()));
                                Value::Null
                            })
                    })
                    .collect(),
            ),
        };
        tracing::debug!(
            service = %self.name(),
            errors = errors.len(),
            "executed subgraph request"
        );
        SubgraphResponse { data, errors }
    }

    fn execute_root_field(
        &self,
        operation: OperationKind,
        field: &Field,
        path: &Path,
        errors: &mut Vec<SubgraphError>,
    ) -> Result<Value, ResolutionError> {
        let unknown = || ResolutionError::UnknownField {
            service: self.name().to_string(),
            type_name: operation.to_string(),
            field: field.name.clone(),
        };
        let declaration = self
            .schema
            .root_field(&field.name)
            .filter(|declaration| declaration.operation == operation)
            .ok_or_else(unknown)?;
        let resolver = self.root_resolvers.get(&field.name).ok_or_else(unknown)?;

        let mut arguments = field.arguments.clone();
        for argument in &declaration.arguments {
            if let (false, Some(default)) = (
                arguments.contains_key(&argument.name),
                &argument.default_value,
            ) {
                arguments.insert(argument.name.clone(), default.clone());
            }
        }

        let value = resolver(&arguments, self.store.as_ref())?;
        if let (Value::Null, FieldType::Entity(type_name)) = (&value, &declaration.returns) {
            return Err(ResolutionError::NotFound {
                type_name: type_name.clone(),
                key: Value::Object(arguments).to_string(),
            });
        }
        self.complete_value(value, &declaration.returns, &field.selections, path, errors)
    }

    fn execute_entity(
        &self,
        type_name: &str,
        representation: &Object,
        selections: &[Field],
        path: &Path,
        errors: &mut Vec<SubgraphError>,
    ) -> Result<Value, ResolutionError> {
        let entity = self.entity(type_name)?;
        let (key, provided): (Object, Object) = representation
            .iter()
            .map(|(field, value)| (field.clone(), value.clone()))
            .partition(|(field, _)| entity.is_key(field));

        // anything beyond the key must be an external field this service was told about
        if let Some(field) = provided.keys().find(|field| {
            field.as_str() != TYPENAME
                && !entity
                    .field(field)
                    .map(|declaration| declaration.is_external())
                    .unwrap_or_default()
        }) {
            return Err(ResolutionError::MalformedReference {
                type_name: type_name.to_string(),
                reason: format!("'{field}' is neither a key nor an external field"),
            });
        }

        let mut instance = match self.resolve_reference(type_name, &key)? {
            Resolution::Found(instance) => instance,
            Resolution::NotFound => {
                return Err(ResolutionError::NotFound {
                    type_name: type_name.to_string(),
                    key: Value::Object(key).to_string(),
                })
            }
        };
        for (field, value) in provided {
            if field != TYPENAME {
                instance.fields.entry(field).or_insert(value);
            }
        }
        Ok(self.complete_object(entity, &instance, selections, path, errors))
    }

    fn complete_value(
        &self,
        value: Value,
        field_type: &FieldType,
        selections: &[Field],
        path: &Path,
        errors: &mut Vec<SubgraphError>,
    ) -> Result<Value, ResolutionError> {
        match (field_type, value) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldType::Scalar(_), value) => Ok(value),
            (FieldType::List(inner), Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    let mut item_path = path.clone();
                    item_path.push(PathElement::Index(index));
                    self.complete_value(item, inner, selections, &item_path, errors)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (FieldType::Entity(type_name), Value::Object(fields)) => {
                let entity = self.entity(type_name)?;
                let key = entity
                    .key
                    .iter()
                    .filter_map(|field| {
                        fields
                            .get(field)
                            .map(|value| (field.clone(), value.clone()))
                    })
                    .collect();
                let instance = EntityInstance {
                    type_name: type_name.clone(),
                    key,
                    fields,
                };
                Ok(self.complete_object(entity, &instance, selections, path, errors))
            }
            (field_type, value) => Err(ResolutionError::Resolver {
                target: path.to_string(),
                reason: format!("expected a value of type {field_type}, got {value}"),
            }),
        }
    }

    fn complete_object(
        &self,
        entity: &EntityType,
        instance: &EntityInstance,
        selections: &[Field],
        path: &Path,
        errors: &mut Vec<SubgraphError>,
    ) -> Value {
        let mut object = Object::new();
        for field in selections {
            let field_path = path.key(field.response_name());
            let value = if field.name == TYPENAME {
                Ok(Value::String(entity.name.clone()))
            } else {
                self.resolve_field(entity, instance, field)
                    .and_then(|(value, field_type)| {
                        self.complete_value(
                            value,
                            &field_type,
                            &field.selections,
                            &field_path,
                            errors,
                        )
                    })
            };
            let value = value.unwrap_or_else(|err| {
                errors.push(SubgraphError::new(&err, field_path));
                Value::Null
            });
            object.insert(field.response_name().to_string(), value);
        }
        Value::Object(object)
    }

    fn resolve_field(
        &self,
        entity: &EntityType,
        instance: &EntityInstance,
        field: &Field,
    ) -> Result<(Value, FieldType), ResolutionError> {
        let declaration = entity
            .field(&field.name)
            .ok_or_else(|| ResolutionError::UnknownField {
                service: self.name().to_string(),
                type_name: entity.name.clone(),
                field: field.name.clone(),
            })?;
        let value = match self
            .field_resolvers
            .get(&(entity.name.clone(), field.name.clone()))
        {
            Some(resolver) => resolver(instance, &field.arguments, self.store.as_ref())?,
            None => instance.get(&field.name).cloned().unwrap_or(Value::Null),
        };
        Ok((value, declaration.field_type.clone()))
    }

    fn entity(&self, type_name: &str) -> Result<&EntityType, ResolutionError> {
        self.schema
            .entity(type_name)
            .ok_or_else(|| self.unknown_type(type_name))
    }

    fn unknown_type(&self, type_name: &str) -> ResolutionError {
        ResolutionError::UnknownType {
            service: self.name().to_string(),
            type_name: type_name.to_string(),
        }
    }
}

/// Attaches resolvers to a [`ServiceSchema`].
pub struct ServiceBuilder {
    schema: ServiceSchema,
    store: Arc<dyn RecordStore>,
    reference_resolvers: HashMap<String, ReferenceResolver>,
    field_resolvers: HashMap<(String, String), FieldResolver>,
    root_resolvers: HashMap<String, RootResolver>,
}

impl ServiceBuilder {
    /// Override how references to `type_name` are resolved.
    ///
    /// Owned types default to a lookup in the collection named after the type, extensions to
    /// [`ReferenceResolver::Representation`].
    pub fn reference_resolver(mut self, type_name: &str, resolver: ReferenceResolver) -> Self {
        self.reference_resolvers
            .insert(type_name.to_string(), resolver);
        self
    }

    pub fn field_resolver<F>(mut self, type_name: &str, field: &str, resolver: F) -> Self
    where
        F: Fn(&EntityInstance, &Object, &dyn RecordStore) -> Result<Value, ResolutionError>
            + Send
            + Sync
            + 'static,
    {
        self.field_resolvers.insert(
            (type_name.to_string(), field.to_string()),
            Arc::new(resolver),
        );
        self
    }

    pub fn root_resolver<F>(mut self, field: &str, resolver: F) -> Self
    where
        F: Fn(&Object, &dyn RecordStore) -> Result<Value, ResolutionError> + Send + Sync + 'static,
    {
        self.root_resolvers
            .insert(field.to_string(), Arc::new(resolver));
        self
    }

    pub fn build(mut self) -> Result<Service, DeclarationError> {
        let service = self.schema.name.clone();
        let undeclared = |target: String| DeclarationError::UndeclaredResolver {
            service: service.clone(),
            target,
        };

        if let Some(type_name) = self
            .reference_resolvers
            .keys()
            .find(|type_name| self.schema.entity(type_name).is_none())
        {
            return Err(undeclared(type_name.clone()));
        }
        if let Some((type_name, field)) = self.field_resolvers.keys().find(|(type_name, field)| {
            !self
                .schema
                .entity(type_name)
                .and_then(|entity| entity.field(field))
                .map(|declaration| !declaration.is_external())
                .unwrap_or_default()
        }) {
            return Err(undeclared(format!("{type_name}.{field}")));
        }
        if let Some(field) = self
            .root_resolvers
            .keys()
            .find(|field| self.schema.root_field(field).is_none())
        {
            return Err(undeclared(field.clone()));
        }
        if let Some(field) = self
            .schema
            .root_fields
            .keys()
            .find(|field| !self.root_resolvers.contains_key(*field))
        {
            return Err(DeclarationError::MissingRootResolver {
                service: service.clone(),
                field: field.clone(),
            });
        }

        for entity in self.schema.types.values() {
            self.reference_resolvers
                .entry(entity.name.clone())
                .or_insert_with(|| match entity.kind {
                    EntityKind::Native => ReferenceResolver::lookup(entity.name.clone()),
                    EntityKind::Extension => ReferenceResolver::Representation,
                });
        }

        tracing::debug!(
            service = %service,
            types = self.schema.types.len(),
            root_fields = self.schema.root_fields.len(),
            "service ready"
        );
        Ok(Service {
            schema: Arc::new(self.schema),
            store: self.store,
            reference_resolvers: self.reference_resolvers,
            field_resolvers: self.field_resolvers,
            root_resolvers: self.root_resolvers,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::protocol::SubgraphErrorKind;
    use crate::registry::EntityRegistry;
    use crate::schema::ArgumentDeclaration;
    use crate::schema::FieldDeclaration;
    use crate::schema::RootField;
    use crate::store::Filter;
    use crate::store::InMemoryRecordStore;

    fn object(value: Value) -> Object {
        match value {
            Value::Object(object) => object,
            _ => panic!("not an object"),
        }
    }

    fn reviews() -> Service {
        let mut registry = EntityRegistry::new("reviews");
        registry
            .declare(
                "Review",
                ["reviewId"],
                vec![
                    FieldDeclaration::native("reviewId", FieldType::id()),
                    FieldDeclaration::native("remarks", FieldType::string()),
                    FieldDeclaration::native("author", FieldType::entity("User")),
                ],
            )
            .unwrap()
            .extend(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::external("id", FieldType::id()),
                    FieldDeclaration::native("reviews", FieldType::list(FieldType::entity("Review"))),
                ],
            )
            .unwrap()
            .root_field(
                RootField::query("reviews", FieldType::list(FieldType::entity("Review")))
                    .argument(ArgumentDeclaration::new("first").with_default(json!(2))),
            )
            .unwrap();

        let store = InMemoryRecordStore::new().with_collection("Review", ["reviewId"]);
        store
            .seed(
                "Review",
                vec![
                    json!({"reviewId": "1", "userId": "1", "remarks": "Love it!"}),
                    json!({"reviewId": "2", "userId": "2", "remarks": "Too expensive."}),
                    json!({"reviewId": "3", "userId": "1", "remarks": "Could be better."}),
                ],
            )
            .unwrap();

        Service::builder(registry.build(), Arc::new(store))
            .field_resolver("User", "reviews", |user, _, store| {
                let id = user.get("id").cloned().unwrap_or(Value::Null);
                Ok(Value::Array(
                    store
                        .find("Review", &Filter::all().eq("userId", id))
                        .into_iter()
                        .map(Value::Object)
                        .collect(),
                ))
            })
            .field_resolver("Review", "author", |review, _, _| {
                Ok(json!({"id": review.get("userId")}))
            })
            .root_resolver("reviews", |arguments, store| {
                let first = arguments
                    .get("first")
                    .and_then(Value::as_u64)
                    .unwrap_or(u64::MAX) as usize;
                Ok(Value::Array(
                    store
                        .find("Review", &Filter::all().limit(first))
                        .into_iter()
                        .map(Value::Object)
                        .collect(),
                ))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn root_fields_use_default_arguments() {
        let response = reviews().execute(&SubgraphRequest::Root {
            operation: OperationKind::Query,
            selections: vec![Field::new("reviews").with_selections(vec![
                Field::new("remarks"),
                Field::new("author").with_selections(vec![Field::new("id")]),
            ])],
        });
        assert_eq!(
            response,
            SubgraphResponse::new(json!({
                "reviews": [
                    {"remarks": "Love it!", "author": {"id": "1"}},
                    {"remarks": "Too expensive.", "author": {"id": "2"}},
                ]
            }))
        );
    }

    #[test]
    fn entities_are_resolved_from_representations() {
        let response = reviews().execute(&SubgraphRequest::Entities {
            type_name: "User".to_string(),
            representations: vec![object(json!({"id": "1"})), object(json!({"id": "3"}))],
            selections: vec![
                Field::new("id"),
                Field::new("reviews").with_selections(vec![Field::new("reviewId")]),
            ],
        });
        assert_eq!(
            response,
            SubgraphResponse::new(json!([
                {"id": "1", "reviews": [{"reviewId": "1"}, {"reviewId": "3"}]},
                {"id": "3", "reviews": []},
            ]))
        );
    }

    #[test]
    fn not_found_entities_are_null_with_an_error() {
        let service = reviews();
        let response = service.execute(&SubgraphRequest::Entities {
            type_name: "Review".to_string(),
            representations: vec![
                object(json!({"reviewId": "9"})),
                object(json!({"reviewId": "2"})),
            ],
            selections: vec![Field::new("remarks")],
        });
        assert_eq!(response.data, json!([null, {"remarks": "Too expensive."}]));
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].kind, SubgraphErrorKind::NotFound);
        assert_eq!(response.errors[0].path, Path::from("0"));
    }

    #[test]
    fn unexpected_representation_fields_are_malformed() {
        let response = reviews().execute(&SubgraphRequest::Entities {
            type_name: "User".to_string(),
            representations: vec![object(json!({"id": "1", "name": "Ada"}))],
            selections: vec![Field::new("id")],
        });
        assert_eq!(response.data, json!([null]));
        assert_eq!(
            response.errors[0].kind,
            SubgraphErrorKind::MalformedReference
        );
    }

    #[test]
    fn unknown_fields_are_scoped_errors() {
        let response = reviews().execute(&SubgraphRequest::Entities {
            type_name: "Review".to_string(),
            representations: vec![object(json!({"reviewId": "1"}))],
            selections: vec![Field::new("remarks"), Field::new("rating")],
        });
        assert_eq!(response.data, json!([{"remarks": "Love it!", "rating": null}]));
        assert_eq!(response.errors[0].path, Path::from("0/rating"));
        assert_eq!(response.errors[0].kind, SubgraphErrorKind::Resolver);
    }

    #[test]
    fn builder_checks_resolvers_against_the_schema() {
        let schema = reviews().schema().clone();
        let err = Service::builder(schema.clone(), Arc::new(InMemoryRecordStore::new()))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DeclarationError::MissingRootResolver {
                service: "reviews".to_string(),
                field: "reviews".to_string(),
            }
        );

        let err = Service::builder(schema, Arc::new(InMemoryRecordStore::new()))
            .field_resolver("User", "id", |_, _, _| Ok(Value::Null))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DeclarationError::UndeclaredResolver {
                service: "reviews".to_string(),
                target: "User.id".to_string(),
            }
        );
    }

    #[test]
    fn resolve_reference_on_extension_echoes_key() {
        let service = reviews();
        let key = object(json!({"id": "5"}));
        assert_eq!(
            service.resolve_reference("User", &key).unwrap(),
            Resolution::Found(EntityInstance::new("User", key))
        );
        assert!(matches!(
            service.resolve_reference("Product", &Object::new()),
            Err(ResolutionError::UnknownType { .. })
        ));
    }
}
