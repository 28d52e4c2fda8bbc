use std::sync::Arc;

use federation::ArgumentDeclaration;
use federation::EntityRegistry;
use federation::FieldDeclaration;
use federation::FieldType;
use federation::Filter;
use federation::InMemoryRecordStore;
use federation::RootField;
use federation::Service;
use json_ext::Value;
use serde_json::json;

use super::input;
use super::DemoError;

pub fn service() -> Result<Service, DemoError> {
    let mut registry = EntityRegistry::new("products");
    registry
        .declare(
            "Product",
            ["productId"],
            vec![
                FieldDeclaration::native("productId", FieldType::id()),
                FieldDeclaration::native("userId", FieldType::id()),
                FieldDeclaration::native("name", FieldType::string()),
                FieldDeclaration::native("price", FieldType::int()),
                FieldDeclaration::native("weight", FieldType::int()),
            ],
        )?
        .root_field(
            RootField::query("topProducts", FieldType::list(FieldType::entity("Product")))
                .argument(ArgumentDeclaration::new("first").with_default(json!(5))),
        )?
        .root_field(
            RootField::mutation("addProduct", FieldType::entity("Product"))
                .argument(ArgumentDeclaration::new("input")),
        )?;

    let store = InMemoryRecordStore::new().with_collection("Product", ["productId"]);
    store.seed(
        "Product",
        vec![
            json!({"productId": "1", "userId": "1", "name": "Table", "price": 899, "weight": 100}),
            json!({"productId": "2", "userId": "1", "name": "Couch", "price": 1299, "weight": 1000}),
            json!({"productId": "3", "userId": "2", "name": "Chair", "price": 54, "weight": 50}),
        ],
    )?;

    let service = Service::builder(registry.build(), Arc::new(store))
        .root_resolver("topProducts", |arguments, store| {
            let first = arguments
                .get("first")
                .and_then(Value::as_u64)
                .unwrap_or_default() as usize;
            Ok(Value::Array(
                store
                    .find("Product", &Filter::all().limit(first))
                    .into_iter()
                    .map(Value::Object)
                    .collect(),
            ))
        })
        .root_resolver("addProduct", |arguments, store| {
            let fields = input(
                "addProduct",
                arguments,
                &["userId", "name", "price", "weight"],
            )?;
            Ok(Value::Object(store.create("Product", fields)?))
        })
        .build()?;
    Ok(service)
}

#[cfg(test)]
mod tests {
    use federation::Field;
    use federation::OperationKind;
    use federation::SubgraphRequest;
    use json_ext::Object;
    use pretty_assertions::assert_eq;

    use super::*;

    fn top_products(arguments: Object) -> SubgraphRequest {
        SubgraphRequest::Root {
            operation: OperationKind::Query,
            selections: vec![Field::new("topProducts")
                .with_arguments(arguments)
                .with_selections(vec![Field::new("name")])],
        }
    }

    #[test]
    fn top_products_defaults_to_five() {
        let service = service().unwrap();
        assert_eq!(
            service.execute(&top_products(Object::new())).data,
            json!({"topProducts": [{"name": "Table"}, {"name": "Couch"}, {"name": "Chair"}]})
        );

        let mut first = Object::new();
        first.insert("first".to_string(), json!(1));
        assert_eq!(
            service.execute(&top_products(first)).data,
            json!({"topProducts": [{"name": "Table"}]})
        );
    }
}
