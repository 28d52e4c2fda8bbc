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
    let mut registry = EntityRegistry::new("accounts");
    registry
        .declare(
            "User",
            ["id"],
            vec![
                FieldDeclaration::native("id", FieldType::id()),
                FieldDeclaration::native("username", FieldType::string()),
                FieldDeclaration::native("name", FieldType::string()),
                FieldDeclaration::native("birthDate", FieldType::string()),
            ],
        )?
        .root_field(
            RootField::query("user", FieldType::list(FieldType::entity("User")))
                .argument(ArgumentDeclaration::new("id")),
        )?
        .root_field(
            RootField::mutation("addUser", FieldType::entity("User"))
                .argument(ArgumentDeclaration::new("input")),
        )?;

    let store = InMemoryRecordStore::new().with_collection("User", ["id"]);
    store.seed(
        "User",
        vec![
            json!({
                "id": "1",
                "name": "Ada Lovelace",
                "birthDate": "1815-12-10",
                "username": "@ada",
            }),
            json!({
                "id": "2",
                "name": "Alan Turing",
                "birthDate": "1912-06-23",
                "username": "@complete",
            }),
        ],
    )?;

    let service = Service::builder(registry.build(), Arc::new(store))
        // one user when an id is given, every user otherwise
        .root_resolver("user", |arguments, store| {
            let filter = match arguments.get("id") {
                None | Some(Value::Null) => Filter::all(),
                Some(id) => Filter::all().eq("id", id.clone()),
            };
            Ok(Value::Array(
                store
                    .find("User", &filter)
                    .into_iter()
                    .map(Value::Object)
                    .collect(),
            ))
        })
        .root_resolver("addUser", |arguments, store| {
            let fields = input("addUser", arguments, &["username", "name", "birthDate"])?;
            Ok(Value::Object(store.create("User", fields)?))
        })
        .build()?;
    Ok(service)
}
