use std::sync::Arc;

use async_trait::async_trait;
use federation::ensure_field;
use federation::merge_field;
use federation::ComposedSchema;
use federation::ComposedType;
use federation::Field;
use federation::FieldType;
use federation::OperationKind;
use federation::SelectionSet;
use json_ext::Path;

use crate::model::collect_variables;
use crate::model::NodeKind;
use crate::model::QueryPlan;
use crate::model::QueryPlanNode;
use crate::parse::parse_operation;
use crate::parse::Operation;
use crate::PlanningError;
use crate::QueryPlanner;

const TYPENAME: &str = "__typename";

/// A query planner working from a composed schema.
#[derive(Debug, Clone)]
pub struct FederatedQueryPlanner {
    schema: Arc<ComposedSchema>,
}

impl FederatedQueryPlanner {
    pub fn new(schema: Arc<ComposedSchema>) -> Self {
        FederatedQueryPlanner { schema }
    }

    pub fn schema(&self) -> &Arc<ComposedSchema> {
        &self.schema
    }
}

#[async_trait]
impl QueryPlanner for FederatedQueryPlanner {
    async fn get(
        &self,
        query: String,
        operation: Option<String>,
    ) -> Result<Arc<QueryPlan>, PlanningError> {
        let span = tracing::debug_span!("plan", operation = ?operation);
        let _guard = span.enter();
        let operation = parse_operation(&query, operation.as_deref())?;
        let plan = plan(&self.schema, &operation)?;
        tracing::debug!(nodes = plan.nodes.len(), "planned operation");
        Ok(Arc::new(plan))
    }
}

/// Build the plan forest for `operation`.
///
/// Root fields of a query are grouped into one node per service. Each mutation root field gets
/// its own node, and the executor runs those in order.
pub fn plan(schema: &ComposedSchema, operation: &Operation) -> Result<QueryPlan, PlanningError> {
    let mut builder = PlanBuilder {
        schema,
        nodes: Vec::new(),
    };

    for field in &operation.selections {
        let root_field =
            schema
                .root_field(&field.name)
                .ok_or_else(|| PlanningError::UnknownField {
                    type_name: root_type_name(operation.kind).to_string(),
                    field: field.name.clone(),
                })?;
        if root_field.operation != operation.kind {
            return Err(PlanningError::UnknownField {
                type_name: root_type_name(operation.kind).to_string(),
                field: field.name.clone(),
            });
        }

        let node = match operation.kind {
            OperationKind::Query => builder.root_node(&root_field.service),
            OperationKind::Mutation => builder.add_node(
                root_field.service.clone(),
                NodeKind::Root,
                Path::empty(),
                None,
            ),
        };

        let path = Path::empty().key(field.response_name());
        let planned = builder.plan_field_value(
            node,
            root_type_name(operation.kind),
            field,
            &root_field.returns,
            &path,
        )?;
        merge_field(&mut builder.nodes[node].selections, planned);
    }

    let mut nodes = builder.nodes;
    for node in &mut nodes {
        collect_variables(&node.selections, &mut node.variable_usages);
    }

    Ok(QueryPlan {
        operation: operation.kind,
        selections: operation.selections.clone(),
        variables: operation.variables.clone(),
        nodes,
    })
}

fn root_type_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Query => "Query",
        OperationKind::Mutation => "Mutation",
    }
}

struct PlanBuilder<'a> {
    schema: &'a ComposedSchema,
    nodes: Vec<QueryPlanNode>,
}

impl<'a> PlanBuilder<'a> {
    fn root_node(&mut self, service: &str) -> usize {
        match self
            .nodes
            .iter()
            .find(|node| node.depends_on.is_none() && node.service == service)
        {
            Some(node) => node.id,
            None => self.add_node(service.to_string(), NodeKind::Root, Path::empty(), None),
        }
    }

    fn add_node(
        &mut self,
        service: String,
        kind: NodeKind,
        path: Path,
        depends_on: Option<usize>,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(QueryPlanNode {
            id,
            service,
            kind,
            path,
            selections: SelectionSet::new(),
            key_inputs: Vec::new(),
            requires: Vec::new(),
            depends_on,
            variable_usages: Vec::new(),
        });
        id
    }

    /// The entity node fetching `entity` at `path` from `service` after `parent`, shared by every
    /// field that needs one.
    fn dependent_node(
        &mut self,
        parent: usize,
        service: &str,
        entity: &ComposedType,
        path: &Path,
    ) -> usize {
        let existing = self.nodes.iter().find(|node| {
            node.depends_on == Some(parent) && node.service == service && node.path == *path
        });
        if let Some(node) = existing {
            return node.id;
        }

        let id = self.add_node(
            service.to_string(),
            NodeKind::Entity {
                type_name: entity.name.clone(),
            },
            path.clone(),
            Some(parent),
        );
        let node = &mut self.nodes[id];
        node.key_inputs = entity.key.clone();
        for key in &entity.key {
            ensure_field(&mut node.selections, key);
        }
        id
    }

    /// Plan the selections made on `entity` at `path` within `node`.
    ///
    /// Returns the part of the selection `node` resolves itself. Everything else is delegated to
    /// dependent nodes.
    fn plan_selections(
        &mut self,
        node: usize,
        entity: &'a ComposedType,
        path: &Path,
        selections: &[Field],
    ) -> Result<SelectionSet, PlanningError> {
        let service = self.nodes[node].service.clone();
        if !entity.is_declared_by(&service) {
            return Err(PlanningError::UnreachableType {
                type_name: entity.name.clone(),
                service,
            });
        }

        let mut local = SelectionSet::new();
        // the key identifies the entity for every dependent node and for merging
        for key in &entity.key {
            ensure_field(&mut local, key);
        }

        for field in selections {
            if field.name == TYPENAME {
                merge_field(&mut local, field.clone());
                continue;
            }
            let composed =
                entity
                    .field(&field.name)
                    .ok_or_else(|| PlanningError::UnknownField {
                        type_name: entity.name.clone(),
                        field: field.name.clone(),
                    })?;

            if entity.is_resolvable_in(&field.name, &service) && composed.requires.is_empty() {
                let field_path = path.key(field.response_name());
                let planned = self.plan_field_value(
                    node,
                    &entity.name,
                    field,
                    &composed.field_type,
                    &field_path,
                )?;
                merge_field(&mut local, planned);
                continue;
            }

            // the owner resolves the field from a representation; requires that the current
            // service cannot provide are fetched by an intermediate node first
            let mut parent = node;
            let mut provided = Vec::new();
            for required in &composed.requires {
                let owner = &entity
                    .field(required)
                    .ok_or_else(|| PlanningError::UnsatisfiableRequires {
                        type_name: entity.name.clone(),
                        field: field.name.clone(),
                    })?
                    .owner;
                if entity.is_resolvable_in(required, &service) {
                    ensure_field(&mut local, required);
                } else {
                    if self.nodes[parent].service != *owner {
                        parent = self.dependent_node(parent, owner, entity, path);
                    }
                    ensure_field(&mut self.nodes[parent].selections, required);
                }
                provided.push(required.clone());
            }

            let dependent = self.dependent_node(parent, &composed.owner, entity, path);
            for required in provided {
                if !self.nodes[dependent].requires.contains(&required) {
                    self.nodes[dependent].requires.push(required);
                }
            }
            let field_path = path.key(field.response_name());
            let planned = self.plan_field_value(
                dependent,
                &entity.name,
                field,
                &composed.field_type,
                &field_path,
            )?;
            merge_field(&mut self.nodes[dependent].selections, planned);
        }

        Ok(local)
    }

    /// Plan the value of `field` of type `field_type`, found at `path` in `node`'s results.
    fn plan_field_value(
        &mut self,
        node: usize,
        parent_type: &str,
        field: &Field,
        field_type: &FieldType,
        path: &Path,
    ) -> Result<Field, PlanningError> {
        let invalid = |reason: &str| PlanningError::InvalidSelection {
            type_name: parent_type.to_string(),
            field: field.name.clone(),
            reason: reason.to_string(),
        };

        let mut planned = Field {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            selections: SelectionSet::new(),
        };
        match field_type.entity_name() {
            None if !field.selections.is_empty() => {
                Err(invalid("scalar fields cannot have a sub-selection"))
            }
            None => Ok(planned),
            Some(_) if field.selections.is_empty() => {
                Err(invalid("entity fields must have a sub-selection"))
            }
            Some(type_name) => {
                let schema = self.schema;
                let entity = schema
                    .entity(type_name)
                    .ok_or_else(|| invalid("the field's type is not part of the graph"))?;
                let entities_path = flatten_lists(path.clone(), field_type);
                planned.selections =
                    self.plan_selections(node, entity, &entities_path, &field.selections)?;
                Ok(planned)
            }
        }
    }
}

fn flatten_lists(path: Path, field_type: &FieldType) -> Path {
    match field_type {
        FieldType::List(inner) => flatten_lists(path.flatten(), inner),
        _ => path,
    }
}
