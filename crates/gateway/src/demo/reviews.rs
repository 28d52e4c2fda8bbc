use std::sync::Arc;

use federation::ArgumentDeclaration;
use federation::EntityInstance;
use federation::EntityRegistry;
use federation::FieldDeclaration;
use federation::FieldType;
use federation::Filter;
use federation::InMemoryRecordStore;
use federation::RecordStore;
use federation::RootField;
use federation::Service;
use json_ext::Object;
use json_ext::Value;
use serde_json::json;

use super::input;
use super::DemoError;

pub fn service() -> Result<Service, DemoError> {
    let reviews = || FieldType::list(FieldType::entity("Review"));

    let mut registry = EntityRegistry::new("reviews");
    registry
        .declare(
            "Review",
            ["reviewId"],
            vec![
                FieldDeclaration::native("reviewId", FieldType::id()),
                FieldDeclaration::native("remarks", FieldType::string()),
                FieldDeclaration::native("userId", FieldType::id()),
                FieldDeclaration::native("productId", FieldType::id()),
                FieldDeclaration::native("author", FieldType::entity("User")),
                FieldDeclaration::native("product", FieldType::entity("Product")),
            ],
        )?
        .extend(
            "User",
            ["id"],
            vec![
                FieldDeclaration::external("id", FieldType::id()),
                FieldDeclaration::native("reviews", reviews()),
            ],
        )?
        .extend(
            "Product",
            ["productId"],
            vec![
                FieldDeclaration::external("productId", FieldType::id()),
                FieldDeclaration::native("reviews", reviews()),
            ],
        )?
        .root_field(RootField::query("reviews", reviews()))?
        .root_field(
            RootField::mutation("addReview", FieldType::entity("Review"))
                .argument(ArgumentDeclaration::new("input")),
        )?;

    let store = InMemoryRecordStore::new().with_collection("Review", ["reviewId"]);
    store.seed(
        "Review",
        vec![
            json!({"reviewId": "1", "userId": "1", "productId": "1", "remarks": "Love it!"}),
            json!({"reviewId": "2", "userId": "1", "productId": "2", "remarks": "Too expensive."}),
            json!({"reviewId": "3", "userId": "2", "productId": "3", "remarks": "Could be better."}),
            json!({"reviewId": "4", "userId": "2", "productId": "1", "remarks": "Prefer something else."}),
        ],
    )?;

    let service = Service::builder(registry.build(), Arc::new(store))
        .field_resolver("User", "reviews", |user, _, store| {
            Ok(reviews_where(store, "userId", user.get("id")))
        })
        .field_resolver("Product", "reviews", |product, _, store| {
            Ok(reviews_where(store, "productId", product.get("productId")))
        })
        .field_resolver("Review", "author", |review, _, _| {
            Ok(reference(review, "userId", "id"))
        })
        .field_resolver("Review", "product", |review, _, _| {
            Ok(reference(review, "productId", "productId"))
        })
        .root_resolver("reviews", |_, store| {
            Ok(reviews_where(store, "reviewId", None))
        })
        .root_resolver("addReview", |arguments, store| {
            let fields = input("addReview", arguments, &["remarks", "userId", "productId"])?;
            Ok(Value::Object(store.create("Review", fields)?))
        })
        .build()?;
    Ok(service)
}

/// Reviews whose `field` equals `value`, or every review when `value` is `None`.
fn reviews_where(store: &dyn RecordStore, field: &str, value: Option<&Value>) -> Value {
    let filter = match value {
        Some(value) => Filter::all().eq(field, value.clone()),
        None => Filter::all(),
    };
    Value::Array(
        store
            .find("Review", &filter)
            .into_iter()
            .map(Value::Object)
            .collect(),
    )
}

/// The key of the entity a review points at, read from one of its columns.
fn reference(review: &EntityInstance, column: &str, key: &str) -> Value {
    match review.get(column) {
        Some(value) if !value.is_null() => {
            let mut reference = Object::new();
            reference.insert(key.to_string(), value.clone());
            Value::Object(reference)
        }
        _ => Value::Null,
    }
}
