//! Executes a query plan: calls services node by node and stitches their answers into one response.

use displaydoc::Display;
use federation::ConflictError;
use json_ext::Object;
use json_ext::Path;
use json_ext::Value;
use query_planner::PlanningError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use crate::client::ServiceRegistry;
pub use crate::client::SubgraphClient;
pub use crate::executor::Executor;
pub use crate::response::Error;
pub use crate::response::Response;

/// Service registry and the client seam.
mod client;

/// The plan coordinator.
mod executor;

/// Client facing response types.
mod response;

/// Error types for execution.
///
/// Note that these are not actually returned to the client, but are instead converted to JSON for
/// [`struct@Error`].
#[derive(Error, Display, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[ignore_extra_doc_attributes]
pub enum FetchError {
    /// Query references unknown service '{service}'.
    ValidationUnknownServiceError {
        /// The service that was unknown.
        service: String,
    },

    /// Query could not be planned: {reason}
    ValidationPlanningError {
        /// The failure reason.
        reason: String,
    },

    /// Service '{service}' could not be reached: {reason}
    ///
    /// Note that this relates to a transport error and not a GraphQL error.
    SubrequestTransportError {
        /// The service failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// Service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the response was rejected.
        reason: String,
    },

    /// Service '{service}' could not find the root entity '{field}': {reason}
    SubrequestRootNotFound {
        service: String,
        field: String,
        reason: String,
    },

    /// {0}
    ExecutionConflict(ConflictError),
}

impl FetchError {
    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let extensions = match serde_json::to_value(self) {
            Ok(Value::Object(extensions)) => extensions,
            _ => Object::new(),
        };
        Error {
            message: self.to_string(),
            path,
            extensions,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::SubrequestTransportError { .. })
    }
}

impl From<PlanningError> for FetchError {
    fn from(err: PlanningError) -> Self {
        FetchError::ValidationPlanningError {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn fetch_errors_carry_their_type_in_extensions() {
        let error = FetchError::SubrequestTransportError {
            service: "reviews".to_string(),
            reason: "connection refused".to_string(),
        }
        .to_graphql_error(Some(Path::from("user")));
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "message": "Service 'reviews' could not be reached: connection refused",
                "path": ["user"],
                "extensions": {
                    "type": "SubrequestTransportError",
                    "service": "reviews",
                    "reason": "connection refused",
                }
            })
        );
    }

    #[test]
    fn planning_errors_are_validation_errors() {
        let error: FetchError = PlanningError::UnknownField {
            type_name: "User".to_string(),
            field: "shippingEstimate".to_string(),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "Query could not be planned: Cannot query field 'shippingEstimate' on type 'User'."
        );
    }
}
