use std::sync::Arc;

use federation::ArgumentDeclaration;
use federation::EntityInstance;
use federation::EntityRegistry;
use federation::FieldDeclaration;
use federation::FieldType;
use federation::InMemoryRecordStore;
use federation::ReferenceResolver;
use federation::ResolutionError;
use federation::RootField;
use federation::Service;
use json_ext::Value;
use serde_json::json;

use super::input;
use super::DemoError;

/// Items above this price ship for free.
const FREE_SHIPPING_ABOVE: f64 = 1000.0;

pub fn service() -> Result<Service, DemoError> {
    let mut registry = EntityRegistry::new("inventory");
    registry
        .extend(
            "Product",
            ["productId"],
            vec![
                FieldDeclaration::external("productId", FieldType::id()),
                FieldDeclaration::external("price", FieldType::int()),
                FieldDeclaration::external("weight", FieldType::int()),
                FieldDeclaration::native("inStock", FieldType::boolean()),
                FieldDeclaration::native("shippingEstimate", FieldType::float())
                    .requires(["price", "weight"]),
            ],
        )?
        .root_field(
            RootField::mutation("addInventory", FieldType::entity("Product"))
                .argument(ArgumentDeclaration::new("input")),
        )?;

    let store = InMemoryRecordStore::new().with_collection("Inventory", ["productId"]);
    store.seed(
        "Inventory",
        vec![
            json!({"productId": "1", "inStock": true}),
            json!({"productId": "2", "inStock": false}),
            json!({"productId": "3", "inStock": true}),
        ],
    )?;

    let service = Service::builder(registry.build(), Arc::new(store))
        // products nobody stocked are not found here
        .reference_resolver("Product", ReferenceResolver::lookup("Inventory"))
        .field_resolver("Product", "shippingEstimate", |product, _, _| {
            shipping_estimate(product)
        })
        .root_resolver("addInventory", |arguments, store| {
            let fields = input("addInventory", arguments, &["productId", "inStock"])?;
            Ok(Value::Object(store.create("Inventory", fields)?))
        })
        .build()?;
    Ok(service)
}

fn shipping_estimate(product: &EntityInstance) -> Result<Value, ResolutionError> {
    let required = |field: &str| {
        product
            .get(field)
            .and_then(Value::as_f64)
            .ok_or_else(|| ResolutionError::Resolver {
                target: "Product.shippingEstimate".to_string(),
                reason: format!("'{field}' was not provided"),
            })
    };
    let price = required("price")?;
    let weight = required("weight")?;
    if price > FREE_SHIPPING_ABOVE {
        return Ok(Value::from(0.0));
    }
    Ok(Value::from(weight * 0.5))
}

#[cfg(test)]
mod tests {
    use federation::Field;
    use federation::SubgraphErrorKind;
    use federation::SubgraphRequest;
    use json_ext::Object;
    use json_ext::Path;
    use pretty_assertions::assert_eq;

    use super::*;

    fn object(value: Value) -> Object {
        match value {
            Value::Object(object) => object,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn shipping_estimate_uses_provided_fields() {
        let service = service().unwrap();
        let response = service.execute(&SubgraphRequest::Entities {
            type_name: "Product".to_string(),
            representations: vec![
                object(json!({"productId": "1", "price": 899, "weight": 100})),
                object(json!({"productId": "2", "price": 1299, "weight": 1000})),
            ],
            selections: vec![Field::new("inStock"), Field::new("shippingEstimate")],
        });
        assert_eq!(
            response.data,
            json!([
                {"inStock": true, "shippingEstimate": 50.0},
                {"inStock": false, "shippingEstimate": 0.0},
            ])
        );
        assert!(response.errors.is_empty());
    }

    #[test]
    fn shipping_estimate_without_required_fields_fails() {
        let service = service().unwrap();
        let response = service.execute(&SubgraphRequest::Entities {
            type_name: "Product".to_string(),
            representations: vec![object(json!({"productId": "3"}))],
            selections: vec![Field::new("inStock"), Field::new("shippingEstimate")],
        });
        assert_eq!(
            response.data,
            json!([{"inStock": true, "shippingEstimate": null}])
        );
        assert_eq!(response.errors[0].path, Path::from("0/shippingEstimate"));
        assert_eq!(response.errors[0].kind, SubgraphErrorKind::Resolver);
    }

    #[test]
    fn unstocked_products_are_not_found() {
        let service = service().unwrap();
        let response = service.execute(&SubgraphRequest::Entities {
            type_name: "Product".to_string(),
            representations: vec![object(json!({"productId": "4"}))],
            selections: vec![Field::new("inStock")],
        });
        assert_eq!(response.data, json!([null]));
        assert_eq!(response.errors[0].kind, SubgraphErrorKind::NotFound);
    }
}
