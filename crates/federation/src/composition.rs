//! Composition of service schemas into the graph served by the gateway.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::composed::ComposedField;
use crate::composed::ComposedRootField;
use crate::composed::ComposedSchema;
use crate::composed::ComposedType;
use crate::composed::RequiresEdge;
use crate::error::join;
use crate::error::CompositionError;
use crate::schema::EntityType;
use crate::schema::FieldType;
use crate::schema::ServiceSchema;

/// Merge every service schema into one graph.
///
/// All problems found are reported together.
pub fn compose(services: &[ServiceSchema]) -> Result<ComposedSchema, Vec<CompositionError>> {
    let grouped = group_declarations(services);
    pre_merge_validations(&grouped)?;
    let composed = merge_services(services, &grouped)?;
    post_merge_validations(&composed)?;
    tracing::info!(
        services = composed.services.len(),
        types = composed.types.len(),
        root_fields = composed.root_fields.len(),
        "composed schema"
    );
    Ok(composed)
}

/// Declarations of one type, in service order.
type Declarations<'a> = Vec<(&'a str, &'a EntityType)>;

fn group_declarations(services: &[ServiceSchema]) -> IndexMap<&str, Declarations<'_>> {
    let mut grouped: IndexMap<&str, Declarations<'_>> = IndexMap::new();
    for service in services {
        for entity in service.types.values() {
            grouped
                .entry(entity.name.as_str())
                .or_default()
                .push((service.name.as_str(), entity));
        }
    }
    grouped
}

/// Every type must have exactly one owner, and every declaration must agree with it.
fn pre_merge_validations(
    grouped: &IndexMap<&str, Declarations<'_>>,
) -> Result<(), Vec<CompositionError>> {
    let mut errors = Vec::new();
    for (type_name, declarations) in grouped {
        let owners: Vec<_> = declarations
            .iter()
            .filter(|(_, entity)| entity.is_native())
            .collect();
        let (owner, owner_declaration) = match owners.as_slice() {
            [(owner, declaration)] => (*owner, *declaration),
            [] => {
                errors.push(CompositionError::UnownedType {
                    type_name: type_name.to_string(),
                    consumers: join(declarations.iter().map(|(service, _)| service)),
                });
                continue;
            }
            _ => {
                errors.push(CompositionError::AmbiguousOwnership {
                    type_name: type_name.to_string(),
                    services: join(owners.iter().map(|(service, _)| service)),
                });
                continue;
            }
        };

        let owner_key: BTreeSet<&String> = owner_declaration.key.iter().collect();
        for (service, declaration) in declarations.iter().filter(|(s, _)| *s != owner) {
            let mismatch = |reason: String| CompositionError::KeyMismatch {
                type_name: type_name.to_string(),
                service: service.to_string(),
                owner: owner.to_string(),
                reason,
            };
            let key: BTreeSet<&String> = declaration.key.iter().collect();
            if key != owner_key {
                errors.push(mismatch(format!(
                    "key ({}) differs from ({})",
                    join(&declaration.key),
                    join(&owner_declaration.key)
                )));
                continue;
            }
            for field in declaration.fields.values() {
                // the owner's declaration wins, otherwise the first other service declaring it
                let expected = owner_declaration
                    .field(&field.name)
                    .or_else(|| {
                        declarations
                            .iter()
                            .filter(|(other, _)| other != service)
                            .find_map(|(_, other)| other.field(&field.name))
                    })
                    .map(|first| &first.field_type);
                if let Some(expected) = expected {
                    if *expected != field.field_type {
                        errors.push(mismatch(format!(
                            "field '{}' has type {}, expected {}",
                            field.name, field.field_type, expected
                        )));
                    }
                }
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn merge_services(
    services: &[ServiceSchema],
    grouped: &IndexMap<&str, Declarations<'_>>,
) -> Result<ComposedSchema, Vec<CompositionError>> {
    let mut errors = Vec::new();
    let mut composed = ComposedSchema {
        services: services.iter().map(|service| service.name.clone()).collect(),
        ..Default::default()
    };

    for (type_name, declarations) in grouped {
        let Some((owner, owner_declaration)) =
            declarations.iter().find(|(_, entity)| entity.is_native())
        else {
            continue;
        };

        let mut fields: IndexMap<String, ComposedField> = IndexMap::new();
        // owner first, so the composed field order follows the owning declaration
        let ordered = std::iter::once((*owner, *owner_declaration)).chain(
            declarations
                .iter()
                .filter(|(service, _)| service != owner)
                .copied(),
        );
        let mut natives: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for (service, declaration) in ordered {
            for field in declaration.fields.values() {
                let composed_field =
                    fields
                        .entry(field.name.clone())
                        .or_insert_with(|| ComposedField {
                            name: field.name.clone(),
                            field_type: field.field_type.clone(),
                            owner: String::new(),
                            external_in: Vec::new(),
                            requires: Vec::new(),
                        });
                let owners = natives.entry(field.name.as_str()).or_default();
                if field.is_external() {
                    composed_field.external_in.push(service.to_string());
                } else {
                    owners.push(service);
                    if owners.len() == 1 {
                        composed_field.owner = service.to_string();
                        composed_field.requires = field.requires.clone();
                    }
                }
            }
        }

        for (field, owners) in &natives {
            match owners.as_slice() {
                [] => {
                    let consumers = &fields[*field].external_in;
                    errors.push(CompositionError::UnresolvableExternalField {
                        type_name: type_name.to_string(),
                        field: field.to_string(),
                        service: consumers.first().cloned().unwrap_or_default(),
                    })
                }
                [_] => {}
                _ => errors.push(CompositionError::AmbiguousFieldOwnership {
                    type_name: type_name.to_string(),
                    field: field.to_string(),
                    services: join(owners),
                }),
            }
        }

        for field in fields.values() {
            for consumer in &field.external_in {
                composed.requires_edges.push(RequiresEdge {
                    type_name: type_name.to_string(),
                    field: field.name.clone(),
                    consumer: consumer.clone(),
                    owner: field.owner.clone(),
                });
            }
        }

        composed.types.insert(
            type_name.to_string(),
            ComposedType {
                name: type_name.to_string(),
                key: owner_declaration.key.clone(),
                owner: owner.to_string(),
                extended_by: declarations
                    .iter()
                    .filter(|(service, _)| service != owner)
                    .map(|(service, _)| service.to_string())
                    .collect(),
                fields,
            },
        );
    }

    let mut root_services: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for service in services {
        for root_field in service.root_fields.values() {
            root_services
                .entry(root_field.name.as_str())
                .or_default()
                .push(service.name.as_str());
            composed
                .root_fields
                .entry(root_field.name.clone())
                .or_insert_with(|| ComposedRootField {
                    name: root_field.name.clone(),
                    service: service.name.clone(),
                    operation: root_field.operation,
                    returns: root_field.returns.clone(),
                    arguments: root_field.arguments.clone(),
                });
        }
    }
    for (field, services) in root_services {
        if services.len() > 1 {
            errors.push(CompositionError::DuplicateRootField {
                field: field.to_string(),
                services: join(services),
            });
        }
    }

    if errors.is_empty() {
        Ok(composed)
    } else {
        Err(errors)
    }
}

/// Relations must point at composed types, and `requires` must not form a cycle.
fn post_merge_validations(composed: &ComposedSchema) -> Result<(), Vec<CompositionError>> {
    let mut errors = Vec::new();

    let mut check_relation = |field_type: &FieldType, referenced_by: String| {
        if let Some(target) = field_type.entity_name() {
            if composed.entity(target).is_none() {
                errors.push(CompositionError::UnknownType {
                    type_name: target.to_string(),
                    referenced_by,
                });
            }
        }
    };
    for entity in composed.types.values() {
        for field in entity.fields.values() {
            check_relation(&field.field_type, format!("{}.{}", entity.name, field.name));
        }
    }
    for root_field in composed.root_fields.values() {
        check_relation(&root_field.returns, root_field.name.clone());
    }

    errors.extend(circular_dependencies(composed));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn circular_dependencies(composed: &ComposedSchema) -> Vec<CompositionError> {
    let mut graph: DiGraphMap<(&str, &str), ()> = DiGraphMap::new();
    for entity in composed.types.values() {
        for field in entity.fields.values() {
            let node = graph.add_node((entity.name.as_str(), field.name.as_str()));
            for required in &field.requires {
                graph.add_edge(node, (entity.name.as_str(), required.as_str()), ());
            }
        }
    }

    tarjan_scc(&graph)
        .into_iter()
        .filter(|component| match component.as_slice() {
            [node] => graph.contains_edge(*node, *node),
            _ => true,
        })
        .map(|mut component| {
            component.sort();
            CompositionError::CircularDependency {
                type_name: component[0].0.to_string(),
                fields: join(component.iter().map(|(_, field)| field)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::registry::EntityRegistry;
    use crate::schema::FieldDeclaration;
    use crate::schema::RootField;

    fn accounts() -> ServiceSchema {
        let mut registry = EntityRegistry::new("accounts");
        registry
            .declare(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::native("id", FieldType::id()),
                    FieldDeclaration::native("name", FieldType::string()),
                ],
            )
            .unwrap()
            .root_field(RootField::query("me", FieldType::entity("User")))
            .unwrap();
        registry.build()
    }

    fn reviews() -> ServiceSchema {
        let mut registry = EntityRegistry::new("reviews");
        registry
            .extend(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::external("id", FieldType::id()),
                    FieldDeclaration::native("reviews", FieldType::list(FieldType::entity("Review"))),
                ],
            )
            .unwrap()
            .declare(
                "Review",
                ["reviewId"],
                vec![
                    FieldDeclaration::native("reviewId", FieldType::id()),
                    FieldDeclaration::native("body", FieldType::string()),
                ],
            )
            .unwrap();
        registry.build()
    }

    fn product(service: &str) -> ServiceSchema {
        let mut registry = EntityRegistry::new(service);
        registry
            .declare(
                "Product",
                ["upc"],
                vec![FieldDeclaration::native("upc", FieldType::id())],
            )
            .unwrap();
        registry.build()
    }

    #[test]
    fn composes_owner_and_extensions() {
        let composed = compose(&[accounts(), reviews()]).unwrap();

        let user = composed.entity("User").unwrap();
        assert_eq!(user.owner, "accounts");
        assert_eq!(user.extended_by, vec!["reviews".to_string()]);
        assert_eq!(composed.owner_of("User", "reviews"), Some("reviews"));
        assert_eq!(composed.owner_of("User", "name"), Some("accounts"));
        assert!(user.is_resolvable_in("id", "reviews"));
        assert!(!user.is_resolvable_in("name", "reviews"));
        assert_eq!(
            composed.requires_edges,
            vec![RequiresEdge {
                type_name: "User".to_string(),
                field: "id".to_string(),
                consumer: "reviews".to_string(),
                owner: "accounts".to_string(),
            }]
        );
    }

    #[test]
    fn two_owners_are_ambiguous() {
        let errors = compose(&[product("products"), product("catalog")]).unwrap_err();
        assert_eq!(
            errors,
            vec![CompositionError::AmbiguousOwnership {
                type_name: "Product".to_string(),
                services: "products, catalog".to_string(),
            }]
        );
    }

    #[test]
    fn extension_without_owner_is_unowned() {
        let errors = compose(&[reviews()]).unwrap_err();
        assert_eq!(
            errors,
            vec![CompositionError::UnownedType {
                type_name: "User".to_string(),
                consumers: "reviews".to_string(),
            }]
        );
    }

    #[test]
    fn key_and_field_types_must_agree() {
        let mut registry = EntityRegistry::new("reviews");
        registry
            .extend(
                "User",
                ["email"],
                vec![FieldDeclaration::external("email", FieldType::string())],
            )
            .unwrap();
        let errors = compose(&[accounts(), registry.build()]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "KEY_MISMATCH");

        let mut registry = EntityRegistry::new("reviews");
        registry
            .extend(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::external("id", FieldType::id()),
                    FieldDeclaration::external("name", FieldType::int()),
                ],
            )
            .unwrap();
        let errors = compose(&[accounts(), registry.build()]).unwrap_err();
        assert_eq!(
            errors,
            vec![CompositionError::KeyMismatch {
                type_name: "User".to_string(),
                service: "reviews".to_string(),
                owner: "accounts".to_string(),
                reason: "field 'name' has type Int, expected String".to_string(),
            }]
        );
    }

    #[test]
    fn types_are_checked_against_the_owner_in_any_order() {
        let mut registry = EntityRegistry::new("reviews");
        registry
            .extend(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::external("id", FieldType::string()),
                    FieldDeclaration::external("name", FieldType::int()),
                ],
            )
            .unwrap();
        let extension = registry.build();
        let expected = vec![
            CompositionError::KeyMismatch {
                type_name: "User".to_string(),
                service: "reviews".to_string(),
                owner: "accounts".to_string(),
                reason: "field 'id' has type String, expected ID".to_string(),
            },
            CompositionError::KeyMismatch {
                type_name: "User".to_string(),
                service: "reviews".to_string(),
                owner: "accounts".to_string(),
                reason: "field 'name' has type Int, expected String".to_string(),
            },
        ];

        assert_eq!(
            compose(&[accounts(), extension.clone()]).unwrap_err(),
            expected
        );
        assert_eq!(compose(&[extension, accounts()]).unwrap_err(), expected);
    }

    #[test]
    fn extensions_agree_on_fields_the_owner_does_not_declare() {
        let extension = |service: &str, discount: FieldType| {
            let mut registry = EntityRegistry::new(service);
            registry
                .extend(
                    "User",
                    ["id"],
                    vec![
                        FieldDeclaration::external("id", FieldType::id()),
                        FieldDeclaration::external("discount", discount),
                    ],
                )
                .unwrap();
            registry.build()
        };
        let errors = compose(&[
            extension("shipping", FieldType::float()),
            accounts(),
            extension("billing", FieldType::int()),
        ])
        .unwrap_err();
        assert!(errors.contains(&CompositionError::KeyMismatch {
            type_name: "User".to_string(),
            service: "billing".to_string(),
            owner: "accounts".to_string(),
            reason: "field 'discount' has type Int, expected Float".to_string(),
        }));
    }

    #[test]
    fn field_ownership_must_be_unique_and_resolvable() {
        let mut registry = EntityRegistry::new("profiles");
        registry
            .extend(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::external("id", FieldType::id()),
                    FieldDeclaration::native("name", FieldType::string()),
                    FieldDeclaration::external("avatar", FieldType::string()),
                ],
            )
            .unwrap();
        let errors = compose(&[accounts(), registry.build()]).unwrap_err();
        assert_eq!(
            errors,
            vec![
                CompositionError::AmbiguousFieldOwnership {
                    type_name: "User".to_string(),
                    field: "name".to_string(),
                    services: "accounts, profiles".to_string(),
                },
                CompositionError::UnresolvableExternalField {
                    type_name: "User".to_string(),
                    field: "avatar".to_string(),
                    service: "profiles".to_string(),
                },
            ]
        );
    }

    #[test]
    fn relations_must_point_at_known_types() {
        let mut registry = EntityRegistry::new("reviews");
        registry
            .declare(
                "Review",
                ["reviewId"],
                vec![
                    FieldDeclaration::native("reviewId", FieldType::id()),
                    FieldDeclaration::native("product", FieldType::entity("Product")),
                ],
            )
            .unwrap();
        let errors = compose(&[registry.build()]).unwrap_err();
        assert_eq!(
            errors,
            vec![CompositionError::UnknownType {
                type_name: "Product".to_string(),
                referenced_by: "Review.product".to_string(),
            }]
        );
    }

    #[test]
    fn duplicate_root_fields_are_rejected() {
        let mut registry = EntityRegistry::new("legacy");
        registry
            .root_field(RootField::query("me", FieldType::entity("User")))
            .unwrap();
        let errors = compose(&[accounts(), registry.build()]).unwrap_err();
        assert_eq!(
            errors,
            vec![CompositionError::DuplicateRootField {
                field: "me".to_string(),
                services: "accounts, legacy".to_string(),
            }]
        );
    }

    #[test]
    fn mutual_requires_are_circular() {
        let mut shipping = EntityRegistry::new("shipping");
        shipping
            .extend(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::external("id", FieldType::id()),
                    FieldDeclaration::external("discount", FieldType::float()),
                    FieldDeclaration::native("shippingCost", FieldType::float())
                        .requires(["discount"]),
                ],
            )
            .unwrap();
        let mut billing = EntityRegistry::new("billing");
        billing
            .extend(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::external("id", FieldType::id()),
                    FieldDeclaration::external("shippingCost", FieldType::float()),
                    FieldDeclaration::native("discount", FieldType::float())
                        .requires(["shippingCost"]),
                ],
            )
            .unwrap();
        let errors = compose(&[accounts(), shipping.build(), billing.build()]).unwrap_err();
        assert_eq!(
            errors,
            vec![CompositionError::CircularDependency {
                type_name: "User".to_string(),
                fields: "discount, shippingCost".to_string(),
            }]
        );
    }

    #[test]
    fn type_level_cycles_are_allowed() {
        let mut registry = EntityRegistry::new("reviews");
        registry
            .extend(
                "User",
                ["id"],
                vec![
                    FieldDeclaration::external("id", FieldType::id()),
                    FieldDeclaration::native("reviews", FieldType::list(FieldType::entity("Review"))),
                ],
            )
            .unwrap()
            .declare(
                "Review",
                ["reviewId"],
                vec![
                    FieldDeclaration::native("reviewId", FieldType::id()),
                    FieldDeclaration::native("author", FieldType::entity("User")),
                ],
            )
            .unwrap();
        assert!(compose(&[accounts(), registry.build()]).is_ok());
    }
}
