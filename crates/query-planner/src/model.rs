//! This is the object model for a QueryPlan.
//! It can be used by an executor to fetch and stitch the parts of a federated response.
//!
//! A QueryPlan is a forest of nodes. Each node is one request to one service; a node with a
//! parent only runs once the parent's results have been merged into the response.

use federation::Field;
use federation::OperationKind;
use federation::SelectionSet;
use json_ext::Object;
use json_ext::Path;
use json_ext::Value;
use serde::Deserialize;
use serde::Serialize;

use crate::PlanningError;

/// Argument values referencing a variable are kept as `{"$variable": "name"}` until the request's
/// variables are known.
pub const VARIABLE_MARKER: &str = "$variable";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The root query plan container
pub struct QueryPlan {
    /// Whether the plan answers a query or a mutation.
    pub operation: OperationKind,

    /// The selection requested by the client, used to shape the final response.
    pub selections: SelectionSet,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    /// The variables declared by the operation.
    pub variables: Vec<VariableDefinition>,

    /// The nodes of the plan, parents before their children.
    pub nodes: Vec<QueryPlanNode>,
}

impl QueryPlan {
    pub fn node(&self, id: usize) -> Option<&QueryPlanNode> {
        self.nodes.get(id)
    }

    /// Nodes without a parent, in execution order.
    pub fn roots(&self) -> impl Iterator<Item = &QueryPlanNode> {
        self.nodes.iter().filter(|node| node.depends_on.is_none())
    }

    pub fn children(&self, id: usize) -> impl Iterator<Item = &QueryPlanNode> {
        self.nodes
            .iter()
            .filter(move |node| node.depends_on == Some(id))
    }

    /// `id` followed by every node that transitively depends on it.
    pub fn subtree(&self, id: usize) -> Vec<usize> {
        let mut ids = vec![id];
        let mut index = 0;
        while index < ids.len() {
            let current = ids[index];
            ids.extend(self.children(current).map(|node| node.id));
            index += 1;
        }
        ids
    }

    /// The services this plan calls.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.service.as_str())
    }

    /// Resolve the request's variables against the declared ones.
    ///
    /// Declared defaults apply when the request does not provide a value.
    pub fn variable_values(&self, provided: &Object) -> Result<Object, PlanningError> {
        let mut values = Object::new();
        for variable in &self.variables {
            match (provided.get(&variable.name), &variable.default_value) {
                (Some(value), _) => {
                    values.insert(variable.name.clone(), value.clone());
                }
                (None, Some(default)) => {
                    values.insert(variable.name.clone(), default.clone());
                }
                (None, None) if !variable.required => {}
                (None, None) => return Err(PlanningError::MissingVariable(variable.name.clone())),
            }
        }
        Ok(values)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A variable declared by an operation.
pub struct VariableDefinition {
    /// The name of the variable, without the `$`.
    pub name: String,

    /// Whether the variable's type is non-null.
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// The value used when the request does not provide one.
    pub default_value: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
/// What a node asks its service for.
pub enum NodeKind {
    /// Root fields of the operation.
    Root,

    /// Fields of the entities found at the node's path.
    #[serde(rename_all = "camelCase")]
    Entity {
        /// The type of the entities.
        type_name: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One request to one service.
pub struct QueryPlanNode {
    /// The position of the node in [`QueryPlan::nodes`].
    pub id: usize,

    /// The name of the service that the node is querying.
    pub service: String,

    #[serde(flatten)]
    /// Whether the node resolves root fields or entities.
    pub kind: NodeKind,

    /// The path where the results are merged into the response.
    /// Entity nodes also read their representations from there.
    pub path: Path,

    /// The fields requested from the service.
    pub selections: SelectionSet,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    /// The key fields sent in each representation.
    pub key_inputs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    /// The fields sent in each representation besides the key.
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// The node whose results this node reads.
    pub depends_on: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    /// The variables that are used by the node's selections.
    pub variable_usages: Vec<String>,
}

impl QueryPlanNode {
    pub fn type_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Root => None,
            NodeKind::Entity { type_name } => Some(type_name),
        }
    }

    /// The node's selections with variable references replaced by their values.
    pub fn selections_with(&self, variables: &Object) -> SelectionSet {
        if self.variable_usages.is_empty() {
            return self.selections.clone();
        }
        self.selections
            .iter()
            .map(|field| substitute_field(field, variables))
            .collect()
    }

    /// Extract the representation of the entity in `value`: its key inputs and required fields.
    ///
    /// Returns `None` when `value` is not an object or lacks one of those fields.
    pub fn representation(&self, value: &Value) -> Option<Object> {
        let object = value.as_object()?;
        self.key_inputs
            .iter()
            .chain(self.requires.iter())
            .map(|field| match object.get(field) {
                Some(Value::Null) | None => None,
                Some(value) => Some((field.clone(), value.clone())),
            })
            .collect()
    }
}

fn substitute_field(field: &Field, variables: &Object) -> Field {
    Field {
        alias: field.alias.clone(),
        name: field.name.clone(),
        arguments: field
            .arguments
            .iter()
            .map(|(name, value)| (name.clone(), substitute_value(value, variables)))
            .collect(),
        selections: field
            .selections
            .iter()
            .map(|child| substitute_field(child, variables))
            .collect(),
    }
}

fn substitute_value(value: &Value, variables: &Object) -> Value {
    match value {
        Value::Object(object) => match variable_name(object) {
            Some(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            None => Value::Object(
                object
                    .iter()
                    .map(|(key, value)| (key.clone(), substitute_value(value, variables)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, variables))
                .collect(),
        ),
        value => value.clone(),
    }
}

pub(crate) fn variable_name(object: &Object) -> Option<&str> {
    match (object.len(), object.get(VARIABLE_MARKER)) {
        (1, Some(Value::String(name))) => Some(name),
        _ => None,
    }
}

/// Collect the variables referenced in `selections`, in first-use order.
pub(crate) fn collect_variables(selections: &[Field], variables: &mut Vec<String>) {
    fn visit(value: &Value, variables: &mut Vec<String>) {
        match value {
            Value::Object(object) => match variable_name(object) {
                Some(name) => {
                    if !variables.iter().any(|known| known == name) {
                        variables.push(name.to_string());
                    }
                }
                None => object.values().for_each(|value| visit(value, variables)),
            },
            Value::Array(items) => items.iter().for_each(|item| visit(item, variables)),
            _ => {}
        }
    }

    for field in selections {
        field
            .arguments
            .values()
            .for_each(|value| visit(value, variables));
        collect_variables(&field.selections, variables);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Object {
        match value {
            Value::Object(object) => object,
            _ => panic!("not an object"),
        }
    }

    fn node(selections: SelectionSet) -> QueryPlanNode {
        let mut variable_usages = Vec::new();
        collect_variables(&selections, &mut variable_usages);
        QueryPlanNode {
            id: 0,
            service: "accounts".to_string(),
            kind: NodeKind::Root,
            path: Path::empty(),
            selections,
            key_inputs: Vec::new(),
            requires: Vec::new(),
            depends_on: None,
            variable_usages,
        }
    }

    #[test]
    fn variables_are_substituted() {
        let node = node(vec![Field::new("user")
            .with_arguments(object(json!({
                "id": {"$variable": "id"},
                "filter": {"tags": [{"$variable": "tag"}], "limit": 3},
            })))
            .with_selections(vec![Field::new("name")])]);
        assert_eq!(node.variable_usages, vec!["id".to_string(), "tag".to_string()]);

        let selections = node.selections_with(&object(json!({"id": "1", "tag": "new"})));
        assert_eq!(
            Value::Object(selections[0].arguments.clone()),
            json!({"id": "1", "filter": {"tags": ["new"], "limit": 3}})
        );
    }

    #[test]
    fn representation_picks_key_and_requires() {
        let mut node = node(Vec::new());
        node.key_inputs = vec!["productId".to_string()];
        node.requires = vec!["price".to_string()];
        assert_eq!(
            node.representation(&json!({"productId": "1", "price": 899, "name": "Table"})),
            Some(object(json!({"productId": "1", "price": 899})))
        );
        assert_eq!(node.representation(&json!({"productId": "1"})), None);
        assert_eq!(node.representation(&json!(null)), None);
    }

    #[test]
    fn variable_values_apply_defaults() {
        let plan = QueryPlan {
            operation: OperationKind::Query,
            selections: Vec::new(),
            variables: vec![
                VariableDefinition {
                    name: "first".to_string(),
                    required: false,
                    default_value: Some(json!(5)),
                },
                VariableDefinition {
                    name: "id".to_string(),
                    required: true,
                    default_value: None,
                },
            ],
            nodes: Vec::new(),
        };
        assert_eq!(
            plan.variable_values(&object(json!({"id": "1"}))).unwrap(),
            object(json!({"first": 5, "id": "1"}))
        );
        assert_eq!(
            plan.variable_values(&Object::new()).unwrap_err(),
            PlanningError::MissingVariable("id".to_string())
        );
    }
}
