use json_ext::Object;
use serde::Deserialize;
use serde::Serialize;

/// A selection set: the fields requested on an object, in request order.
pub type SelectionSet = Vec<Field>;

/// A field selection, with its arguments already resolved to values.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub arguments: Object,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selections: SelectionSet,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_arguments(mut self, arguments: Object) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_selections(mut self, selections: SelectionSet) -> Self {
        self.selections = selections;
        self
    }

    /// The key this field is written under in a response.
    pub fn response_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Add `field` to `selections`, merging sub-selections into an existing field with the same
/// response name.
pub fn merge_field(selections: &mut SelectionSet, field: Field) {
    match selections
        .iter_mut()
        .find(|existing| existing.response_name() == field.response_name())
    {
        Some(existing) => {
            for child in field.selections {
                merge_field(&mut existing.selections, child);
            }
        }
        None => selections.push(field),
    }
}

/// Make sure a plain field named `name` is selected.
pub fn ensure_field(selections: &mut SelectionSet, name: &str) {
    if !selections
        .iter()
        .any(|field| field.alias.is_none() && field.name == name)
    {
        selections.push(Field::new(name));
    }
}
