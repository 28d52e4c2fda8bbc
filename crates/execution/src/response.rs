use federation::Field;
use federation::SubgraphError;
use json_ext::Object;
use json_ext::Path;
use json_ext::Value;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

/// A graphql response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Response {
    /// The response data, `null` when the request failed as a whole.
    #[serde(default)]
    #[builder(default = Value::Null)]
    pub data: Value,

    /// The graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub errors: Vec<Error>,
}

/// Any error.
#[derive(Error, Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The path of the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional graphql extensions.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Error {
    /// Convert an error reported by `service` to a client error at `path`.
    pub(crate) fn from_subgraph(service: &str, error: SubgraphError, path: Path) -> Self {
        let mut extensions = Object::new();
        if let Ok(code) = serde_json::to_value(error.kind) {
            extensions.insert("code".to_string(), code);
        }
        extensions.insert("service".to_string(), Value::String(service.to_string()));
        Error {
            message: error.message,
            path: Some(path),
            extensions,
        }
    }
}

/// Project `value` onto the client's `selections`.
///
/// Fields the plan added for its own needs, such as keys and required fields, are dropped and
/// selected fields that were never resolved become `null`.
pub(crate) fn shape(value: &Value, selections: &[Field]) -> Value {
    if selections.is_empty() {
        return value.clone();
    }
    match value {
        Value::Object(object) => Value::Object(
            selections
                .iter()
                .map(|field| {
                    let name = field.response_name();
                    let value = object
                        .get(name)
                        .map(|value| shape(value, &field.selections))
                        .unwrap_or(Value::Null);
                    (name.to_string(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| shape(item, selections))
                .collect(),
        ),
        _ => Value::Null,
    }
}
