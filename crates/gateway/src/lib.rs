//! The gateway: composes the services into one graph and answers client operations over it.

use std::sync::Arc;

use configuration::Configuration;
use configuration::ConfigurationError;
use displaydoc::Display;
use execution::Executor;
use execution::FetchError;
use execution::Response;
use execution::ServiceRegistry;
use federation::compose;
use federation::ComposedSchema;
use federation::CompositionError;
use federation::Service;
use json_ext::Object;
use parking_lot::RwLock;
use query_planner::CachingQueryPlanner;
use query_planner::FederatedQueryPlanner;
use query_planner::QueryPlanner;
use query_planner::WithCaching;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing_futures::Instrument;
use typed_builder::TypedBuilder;

pub mod demo;

/// Errors raised while the gateway starts or reloads.
#[derive(Error, Display, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Could not compose the graph: {summary}
    Composition {
        summary: String,
        errors: Vec<CompositionError>,
    },

    /// Service '{0}' is configured but not available.
    UnknownService(String),

    /// {0}
    Configuration(#[from] ConfigurationError),
}

impl From<Vec<CompositionError>> for GatewayError {
    fn from(errors: Vec<CompositionError>) -> Self {
        GatewayError::Composition {
            summary: errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            errors,
        }
    }
}

/// A client request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Request {
    /// The graphql query.
    pub query: String,

    /// The optional graphql operation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub operation_name: Option<String>,

    /// The optional variables in the form of a json object.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub variables: Object,
}

/// Everything derived from one composition. Replaced as a whole on reload.
#[derive(Debug)]
struct State {
    schema: Arc<ComposedSchema>,
    planner: CachingQueryPlanner<FederatedQueryPlanner>,
    executor: Executor,
}

impl State {
    fn new(configuration: &Configuration, services: Vec<Service>) -> Result<Self, GatewayError> {
        if let Some(missing) = configuration
            .services
            .iter()
            .find(|name| !services.iter().any(|service| service.name() == name.as_str()))
        {
            return Err(GatewayError::UnknownService(missing.clone()));
        }
        let services = services
            .into_iter()
            .filter(|service| configuration.serves(service.name()))
            .collect::<Vec<_>>();

        let schemas = services
            .iter()
            .map(|service| service.schema().clone())
            .collect::<Vec<_>>();
        let schema = Arc::new(compose(&schemas)?);
        let planner = FederatedQueryPlanner::new(Arc::clone(&schema))
            .with_caching(configuration.planner.cache_limit);
        let registry = services.into_iter().collect::<ServiceRegistry>();
        let executor = Executor::new(Arc::new(registry), configuration.execution.clone());
        Ok(State {
            schema,
            planner,
            executor,
        })
    }
}

/// Serves a composed graph.
///
/// The composed schema, the plan cache and the service registry are swapped together by
/// [`Gateway::reload`]. Requests in flight keep the state they started with.
#[derive(Debug)]
pub struct Gateway {
    configuration: Configuration,
    state: RwLock<Arc<State>>,
}

impl Gateway {
    /// Compose `services` and get ready to serve.
    ///
    /// When the configuration lists services, only those are composed, and each must be
    /// available.
    pub fn new(configuration: Configuration, services: Vec<Service>) -> Result<Self, GatewayError> {
        let configuration = configuration.validate()?;
        let state = State::new(&configuration, services)?;
        Ok(Gateway {
            configuration,
            state: RwLock::new(Arc::new(state)),
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The graph currently served.
    pub fn schema(&self) -> Arc<ComposedSchema> {
        Arc::clone(&self.state.read().schema)
    }

    /// Recompose from `services` and start serving the result.
    ///
    /// When composition fails the gateway keeps serving the previous graph.
    pub fn reload(&self, services: Vec<Service>) -> Result<(), GatewayError> {
        let state = State::new(&self.configuration, services).map_err(|err| {
            tracing::error!(%err, "reload failed, keeping the current graph");
            err
        })?;
        tracing::info!(
            services = ?state.schema.services,
            "reloaded graph"
        );
        *self.state.write() = Arc::new(state);
        Ok(())
    }

    /// Plan and execute a client request.
    pub async fn execute(&self, request: Request) -> Response {
        let state = Arc::clone(&self.state.read());
        let span = tracing::info_span!("request", operation = ?request.operation_name);
        async move {
            let plan = match state
                .planner
                .get(request.query, request.operation_name)
                .await
            {
                Ok(plan) => plan,
                Err(err) => {
                    tracing::debug!(%err, "could not plan request");
                    return planning_failure(err);
                }
            };
            let variables = match plan.variable_values(&request.variables) {
                Ok(variables) => variables,
                Err(err) => return planning_failure(err),
            };
            state.executor.execute(&plan, &variables).await
        }
        .instrument(span)
        .await
    }
}

fn planning_failure(err: query_planner::PlanningError) -> Response {
    Response::builder()
        .errors(vec![FetchError::from(err).to_graphql_error(None)])
        .build()
}
