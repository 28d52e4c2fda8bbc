//! Plans the execution of a client operation over a composed schema.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use displaydoc::Display;
use thiserror::Error;

pub use crate::caching::CachingQueryPlanner;
pub use crate::model::*;
pub use crate::parse::parse_operation;
pub use crate::parse::Operation;
pub use crate::planner::plan;
pub use crate::planner::FederatedQueryPlanner;

/// A caching query planner decorator
mod caching;

/// The query plan model
mod model;

/// Turns GraphQL text into a selection tree
mod parse;

/// Builds plans from a composed schema
mod planner;

/// Error types for QueryPlanner.
///
/// Planning errors are reported to the client as validation errors; no service is called.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    /// Syntax error: {0}
    Syntax(String),

    /// The document does not contain any operation.
    NoOperation,

    /// Operation '{0}' was not found in the document.
    UnknownOperation(String),

    /// The document contains several operations; an operation name is required.
    OperationNameRequired,

    /// {0} operations are not supported.
    UnsupportedOperation(String),

    /// Fragments are not supported.
    UnsupportedFragment,

    /// Cannot query field '{field}' on type '{type_name}'.
    UnknownField { type_name: String, field: String },

    /// Invalid selection on '{type_name}.{field}': {reason}
    InvalidSelection {
        type_name: String,
        field: String,
        reason: String,
    },

    /// Type '{type_name}' is returned by service '{service}' which does not declare it.
    UnreachableType { type_name: String, service: String },

    /// Field '{type_name}.{field}' requires fields that cannot be provided at this position.
    UnsatisfiableRequires { type_name: String, field: String },

    /// Variable '${0}' is required but was not provided.
    MissingVariable(String),
}

/// QueryPlanner can be used to plan queries.
///
/// Implementations may cache query plans.
#[async_trait]
pub trait QueryPlanner: Send + Sync + Debug {
    /// Returns a query plan given the query and the operation name.
    /// Implementations may cache query plans.
    #[must_use = "query plan result must be used"]
    async fn get(
        &self,
        query: String,
        operation: Option<String>,
    ) -> Result<Arc<QueryPlan>, PlanningError>;
}

/// With caching trait.
///
/// Adds with_caching to any query planner.
pub trait WithCaching: QueryPlanner
where
    Self: Sized + QueryPlanner + 'static,
{
    /// Wrap this query planner in a caching decorator.
    /// The wrapped planner is consumed.
    fn with_caching(self, plan_cache_limit: usize) -> CachingQueryPlanner<Self> {
        CachingQueryPlanner::new(self, plan_cache_limit)
    }
}

impl<T: ?Sized> WithCaching for T where T: QueryPlanner + Sized + 'static {}
