use apollo_compiler::ast;
use federation::merge_field;
use federation::Field;
use federation::OperationKind;
use federation::SelectionSet;
use json_ext::Object;
use json_ext::Value;

use crate::model::VariableDefinition;
use crate::model::VARIABLE_MARKER;
use crate::PlanningError;

/// The operation selected from a GraphQL document.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub selections: SelectionSet,
}

/// Parse `query` and select the operation to run.
///
/// When the document holds a single operation, `operation_name` may be omitted.
pub fn parse_operation(
    query: &str,
    operation_name: Option<&str>,
) -> Result<Operation, PlanningError> {
    let document = ast::Document::parse(query, "query.graphql")
        .map_err(|invalid| PlanningError::Syntax(invalid.errors.to_string()))?;

    let mut operations = Vec::new();
    for definition in &document.definitions {
        match definition {
            ast::Definition::OperationDefinition(operation) => operations.push(operation),
            ast::Definition::FragmentDefinition(_) => {
                return Err(PlanningError::UnsupportedFragment)
            }
            _ => {}
        }
    }

    let operation = match operation_name {
        Some(name) => operations
            .into_iter()
            .find(|operation| operation.name.as_ref().map(|n| n.as_str()) == Some(name))
            .ok_or_else(|| PlanningError::UnknownOperation(name.to_string()))?,
        None => match operations.as_slice() {
            [] => return Err(PlanningError::NoOperation),
            [operation] => *operation,
            _ => return Err(PlanningError::OperationNameRequired),
        },
    };

    let kind = match operation.operation_type {
        ast::OperationType::Query => OperationKind::Query,
        ast::OperationType::Mutation => OperationKind::Mutation,
        ast::OperationType::Subscription => {
            return Err(PlanningError::UnsupportedOperation(
                "subscription".to_string(),
            ))
        }
    };

    let variables = operation
        .variables
        .iter()
        .map(|variable| -> Result<VariableDefinition, PlanningError> {
            Ok(VariableDefinition {
                name: variable.name.to_string(),
                required: variable.ty.is_non_null(),
                default_value: variable
                    .default_value
                    .as_ref()
                    .map(|value| constant_value(value))
                    .transpose()?,
            })
        })
        .collect::<Result<Vec<_>, PlanningError>>()?;

    Ok(Operation {
        kind,
        name: operation.name.as_ref().map(|name| name.to_string()),
        variables,
        selections: selection_set(&operation.selection_set)?,
    })
}

fn selection_set(selections: &[ast::Selection]) -> Result<SelectionSet, PlanningError> {
    let mut fields = SelectionSet::new();
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                let arguments = field
                    .arguments
                    .iter()
                    .map(|argument| -> Result<(String, Value), PlanningError> {
                        Ok((argument.name.to_string(), value(&argument.value)?))
                    })
                    .collect::<Result<Object, PlanningError>>()?;
                merge_field(
                    &mut fields,
                    Field {
                        alias: field.alias.as_ref().map(|alias| alias.to_string()),
                        name: field.name.to_string(),
                        arguments,
                        selections: selection_set(&field.selection_set)?,
                    },
                );
            }
            ast::Selection::FragmentSpread(_) | ast::Selection::InlineFragment(_) => {
                return Err(PlanningError::UnsupportedFragment)
            }
        }
    }
    Ok(fields)
}

fn constant_value(value: &ast::Value) -> Result<Value, PlanningError> {
    let converted = self::value(value)?;
    let mut variables = Vec::new();
    crate::model::collect_variables(
        &[Field::new("default").with_arguments(Object::from_iter([(
            "value".to_string(),
            converted.clone(),
        )]))],
        &mut variables,
    );
    if variables.is_empty() {
        Ok(converted)
    } else {
        Err(PlanningError::Syntax(
            "variables are not allowed in default values".to_string(),
        ))
    }
}

fn value(value: &ast::Value) -> Result<Value, PlanningError> {
    Ok(match value {
        ast::Value::Null => Value::Null,
        ast::Value::Enum(name) => Value::String(name.to_string()),
        ast::Value::Variable(name) => {
            let mut reference = Object::new();
            reference.insert(VARIABLE_MARKER.to_string(), Value::String(name.to_string()));
            Value::Object(reference)
        }
        ast::Value::String(string) => Value::String(string.to_string()),
        ast::Value::Float(float) => float
            .as_str()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|err| PlanningError::Syntax(err.to_string()))?,
        ast::Value::Int(int) => {
            let text = int.as_str();
            text.parse::<i64>()
                .map(Value::from)
                .or_else(|_| text.parse::<f64>().map(Value::from))
                .map_err(|err| PlanningError::Syntax(err.to_string()))?
        }
        ast::Value::Boolean(boolean) => Value::Bool(*boolean),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| self::value(item))
                .collect::<Result<_, _>>()?,
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, field)| -> Result<(String, Value), PlanningError> {
                    Ok((name.to_string(), self::value(field)?))
                })
                .collect::<Result<_, PlanningError>>()?,
        ),
    })
}
