use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;

use configuration::Execution;
use federation::ConflictError;
use federation::EntityInstance;
use federation::OperationKind;
use federation::SubgraphErrorKind;
use federation::SubgraphRequest;
use federation::SubgraphResponse;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use json_ext::JsonExtError;
use json_ext::Object;
use json_ext::Path;
use json_ext::PathElement;
use json_ext::Value;
use json_ext::ValueExt;
use query_planner::NodeKind;
use query_planner::QueryPlan;
use query_planner::QueryPlanNode;
use tracing_futures::Instrument;

use crate::client::ServiceRegistry;
use crate::client::SubgraphClient;
use crate::response::shape;
use crate::response::Error;
use crate::response::Response;
use crate::FetchError;

/// Runs query plans against the services of a [`ServiceRegistry`].
#[derive(Clone, Debug)]
pub struct Executor {
    registry: Arc<ServiceRegistry>,
    options: Execution,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeState {
    Pending,
    InFlight,
    Resolved,
    Failed,
}

/// A call ready to be sent.
struct Fetch {
    id: usize,
    service: String,
    client: Arc<dyn SubgraphClient>,
    request: SubgraphRequest,
    /// Where each representation was read from, in request order.
    paths: Vec<Path>,
}

/// A call that came back.
struct Fetched {
    id: usize,
    paths: Vec<Path>,
    result: Result<SubgraphResponse, FetchError>,
}

/// The state of one plan execution. Only the coordinator writes to it.
struct Run<'a> {
    plan: &'a QueryPlan,
    variables: &'a Object,
    data: Value,
    errors: Vec<Error>,
    states: Vec<NodeState>,
}

impl Executor {
    pub fn new(registry: Arc<ServiceRegistry>, options: Execution) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Validate the entire plan for services used.
    #[tracing::instrument(skip_all, level = "debug", name = "validate")]
    pub fn validate(&self, plan: &QueryPlan) -> Result<(), Response> {
        let errors = plan
            .services()
            .filter(|service| !self.registry.contains(service))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|service| {
                FetchError::ValidationUnknownServiceError {
                    service: service.to_string(),
                }
                .to_graphql_error(None)
            })
            .collect::<Vec<_>>();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Response::builder().errors(errors).build())
        }
    }

    /// Execute the plan and return a [`Response`].
    ///
    /// `variables` must already hold the values of every variable the operation declares. No
    /// service is called when the plan fails validation.
    pub async fn execute(&self, plan: &QueryPlan, variables: &Object) -> Response {
        if let Err(response) = self.validate(plan) {
            return response;
        }

        let span = tracing::info_span!(
            "execute",
            operation = %plan.operation,
            nodes = plan.nodes.len()
        );
        self.run(plan, variables).instrument(span).await
    }

    async fn run(&self, plan: &QueryPlan, variables: &Object) -> Response {
        let mut run = Run {
            plan,
            variables,
            data: Value::Object(Object::new()),
            errors: Vec::new(),
            states: vec![NodeState::Pending; plan.nodes.len()],
        };

        // mutation fields run one after the other, each with its dependents
        let batches = match plan.operation {
            OperationKind::Query => vec![plan.roots().map(|node| node.id).collect::<Vec<_>>()],
            OperationKind::Mutation => plan.roots().map(|node| vec![node.id]).collect(),
        };

        for batch in batches {
            if let Err(error) = self.run_batch(&mut run, batch).await {
                tracing::debug!(%error, "request failed");
                run.errors.push(error);
                return Response::builder().errors(run.errors).build();
            }
        }

        Response::builder()
            .data(shape(&run.data, &plan.selections))
            .errors(run.errors)
            .build()
    }

    /// Run `start` and everything that depends on them.
    ///
    /// Returns the error that fails the whole request, if any. In-flight calls are abandoned
    /// then.
    async fn run_batch(&self, run: &mut Run<'_>, start: Vec<usize>) -> Result<(), Error> {
        let mut ready = VecDeque::from(start);
        let mut in_flight = FuturesUnordered::new();

        loop {
            while let Some(id) = ready.pop_front() {
                match run.prepare(id, &self.registry) {
                    Ok(Some(fetch)) => {
                        run.states[id] = NodeState::InFlight;
                        in_flight.push(self.fetch(fetch));
                    }
                    Ok(None) => {
                        tracing::trace!(node = id, "nothing to fetch");
                        run.resolve(id, &mut ready);
                    }
                    Err(err) => {
                        if run.fail(id, &err) {
                            return Err(err.to_graphql_error(None));
                        }
                    }
                }
            }

            let Some(fetched) = in_flight.next().await else {
                break;
            };
            let id = fetched.id;
            if run.complete(fetched)? {
                run.resolve(id, &mut ready);
            }
        }

        Ok(())
    }

    async fn fetch(&self, fetch: Fetch) -> Fetched {
        let Fetch {
            id,
            service,
            client,
            request,
            paths,
        } = fetch;

        let span = tracing::info_span!("fetch", service = %service, node = id);
        let result = self
            .call(&service, client.as_ref(), &request)
            .instrument(span)
            .await;
        Fetched { id, paths, result }
    }

    /// Call a service, retrying transport failures. A call that outlives the timeout is a
    /// transport failure.
    async fn call(
        &self,
        service: &str,
        client: &dyn SubgraphClient,
        request: &SubgraphRequest,
    ) -> Result<SubgraphResponse, FetchError> {
        let mut attempt = 0;
        loop {
            let call = client.call(request.clone());
            let result = match tokio::time::timeout(self.options.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::SubrequestTransportError {
                    service: service.to_string(),
                    reason: format!("timed out after {}ms", self.options.timeout.as_millis()),
                }),
            };
            match result {
                Err(err) if err.is_transport() && attempt < self.options.retries => {
                    attempt += 1;
                    tracing::warn!(%err, attempt, "retrying service call");
                }
                result => return result,
            }
        }
    }
}

impl<'a> Run<'a> {
    fn node(&self, id: usize) -> &'a QueryPlanNode {
        let plan: &'a QueryPlan = self.plan;
        &plan.nodes[id]
    }

    /// Mark `id` resolved and queue the nodes waiting on it.
    fn resolve(&mut self, id: usize, ready: &mut VecDeque<usize>) {
        self.states[id] = NodeState::Resolved;
        let plan: &'a QueryPlan = self.plan;
        ready.extend(
            plan.children(id)
                .filter(|child| self.states[child.id] == NodeState::Pending)
                .map(|child| child.id),
        );
    }

    /// Build the call for a node whose parent resolved.
    ///
    /// Entity nodes read their representations from the response built so far; a node with
    /// nothing to ask for is resolved without a call.
    fn prepare(
        &self,
        id: usize,
        registry: &ServiceRegistry,
    ) -> Result<Option<Fetch>, FetchError> {
        let node = self.node(id);
        let client = registry.get(&node.service).ok_or_else(|| {
            FetchError::ValidationUnknownServiceError {
                service: node.service.clone(),
            }
        })?;
        let selections = node.selections_with(self.variables);

        let (request, paths) = match &node.kind {
            NodeKind::Root => (
                SubgraphRequest::Root {
                    operation: self.plan.operation,
                    selections,
                },
                Vec::new(),
            ),
            NodeKind::Entity { type_name } => {
                let mut paths = Vec::new();
                let mut representations = Vec::new();
                self.data.select_values_and_paths(&node.path, |path, value| {
                    if let Some(representation) = node.representation(value) {
                        paths.push(path.clone());
                        representations.push(representation);
                    }
                });
                if representations.is_empty() {
                    return Ok(None);
                }
                (
                    SubgraphRequest::Entities {
                        type_name: type_name.clone(),
                        representations,
                        selections,
                    },
                    paths,
                )
            }
        };

        tracing::debug!(node = id, service = %node.service, path = %node.path, "fetching");
        Ok(Some(Fetch {
            id,
            service: node.service.clone(),
            client,
            request,
            paths,
        }))
    }

    /// Merge a service answer. Returns whether the node resolved.
    fn complete(&mut self, fetched: Fetched) -> Result<bool, Error> {
        let node = self.node(fetched.id);
        let response = match fetched.result {
            Ok(response) => response,
            Err(err) => {
                if self.fail(fetched.id, &err) {
                    return Err(err.to_graphql_error(None));
                }
                return Ok(false);
            }
        };

        match &node.kind {
            NodeKind::Root => self.merge_root(node, response),
            NodeKind::Entity { type_name } => {
                self.merge_entities(node, type_name, fetched.paths, response)
            }
        }
    }

    fn merge_root(
        &mut self,
        node: &QueryPlanNode,
        response: SubgraphResponse,
    ) -> Result<bool, Error> {
        let data = match response.data {
            Value::Object(data) => data,
            other => {
                let err = FetchError::SubrequestMalformedResponse {
                    service: node.service.clone(),
                    reason: format!("expected an object, got {other}"),
                };
                return Err(err.to_graphql_error(None));
            }
        };

        for error in response.errors {
            // a root entity that does not exist fails the request
            if error.kind == SubgraphErrorKind::NotFound && error.path.len() == 1 {
                let field = error
                    .path
                    .last()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let err = FetchError::SubrequestRootNotFound {
                    service: node.service.clone(),
                    field,
                    reason: error.message,
                };
                return Err(err.to_graphql_error(Some(error.path)));
            }
            let path = error.path.clone();
            self.errors
                .push(Error::from_subgraph(&node.service, error, path));
        }

        let root_type = match self.plan.operation {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
        };
        self.data
            .strict_merge(Value::Object(data), &Path::empty())
            .map_err(|err| conflict(root_type, &Object::new(), err).to_graphql_error(None))?;
        Ok(true)
    }

    fn merge_entities(
        &mut self,
        node: &QueryPlanNode,
        type_name: &str,
        paths: Vec<Path>,
        response: SubgraphResponse,
    ) -> Result<bool, Error> {
        let entities = match response.data {
            Value::Array(entities) if entities.len() == paths.len() => entities,
            other => {
                let err = FetchError::SubrequestMalformedResponse {
                    service: node.service.clone(),
                    reason: format!(
                        "expected a list of {} entities, got {other}",
                        paths.len()
                    ),
                };
                self.fail(node.id, &err);
                return Ok(false);
            }
        };

        for (path, entity) in paths.iter().zip(entities) {
            match entity {
                Value::Object(fields) => {
                    // the representation was read from here, so this is an object
                    let Value::Object(target) = self
                        .data
                        .get_path_mut(path)
                        .map_err(|err| err_at(node, err))?
                    else {
                        continue;
                    };
                    let key = node
                        .key_inputs
                        .iter()
                        .filter_map(|key| Some((key.clone(), target.get(key)?.clone())))
                        .collect::<Object>();
                    let mut instance = EntityInstance {
                        type_name: type_name.to_string(),
                        key: key.clone(),
                        fields: std::mem::take(target),
                    };
                    let merged = instance.merge(EntityInstance {
                        type_name: type_name.to_string(),
                        key,
                        fields,
                    });
                    *target = instance.fields;
                    merged.map_err(|err| {
                        FetchError::ExecutionConflict(err).to_graphql_error(Some(path.clone()))
                    })?;
                }
                _ => null_fields(&mut self.data, path, node),
            }
        }

        for error in response.errors {
            let path = match error.path.iter().next() {
                Some(PathElement::Index(index)) if *index < paths.len() => {
                    paths[*index].join(error.path.iter().skip(1).cloned().collect::<Path>())
                }
                _ => node.path.clone(),
            };
            self.errors
                .push(Error::from_subgraph(&node.service, error, path));
        }
        Ok(true)
    }

    /// Record the failure of `id`. The node and everything depending on it are abandoned and
    /// their fields become `null`.
    ///
    /// Returns `true` when the failure fails the whole request.
    fn fail(&mut self, id: usize, err: &FetchError) -> bool {
        let node = self.node(id);
        tracing::warn!(node = id, service = %node.service, %err, "node failed");
        if node.depends_on.is_none() {
            self.states[id] = NodeState::Failed;
            return true;
        }

        let mut reported = Vec::new();
        self.data
            .select_values_and_paths(&node.path, |path, _| reported.push(path.clone()));
        if reported.is_empty() {
            reported.push(
                node.path
                    .iter()
                    .take_while(|element| !matches!(element, PathElement::Flatten))
                    .cloned()
                    .collect(),
            );
        }

        for failed in self.plan.subtree(id) {
            self.states[failed] = NodeState::Failed;
            let failed = self.node(failed);
            let mut targets = Vec::new();
            self.data
                .select_values_and_paths(&failed.path, |path, _| targets.push(path.clone()));
            for path in targets {
                null_fields(&mut self.data, &path, failed);
            }
        }
        // one error per entity the node was fetching
        for path in reported {
            self.errors.push(err.to_graphql_error(Some(path)));
        }
        false
    }
}

/// Set every field `node` was asked for to `null` on the entity at `path`, unless another node
/// already provided it.
fn null_fields(data: &mut Value, path: &Path, node: &QueryPlanNode) {
    if let Ok(Value::Object(entity)) = data.get_path_mut(path) {
        for field in &node.selections {
            entity
                .entry(field.response_name().to_string())
                .or_insert(Value::Null);
        }
    }
}

fn conflict(type_name: &str, key: &Object, err: JsonExtError) -> FetchError {
    let field = match err {
        JsonExtError::Conflict { field, .. } => field,
        other => other.to_string(),
    };
    FetchError::ExecutionConflict(ConflictError {
        type_name: type_name.to_string(),
        key: Value::Object(key.clone()).to_string(),
        field,
    })
}

fn err_at(node: &QueryPlanNode, err: JsonExtError) -> Error {
    FetchError::SubrequestMalformedResponse {
        service: node.service.clone(),
        reason: err.to_string(),
    }
    .to_graphql_error(Some(node.path.clone()))
}
