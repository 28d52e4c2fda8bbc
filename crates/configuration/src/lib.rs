//! Logic for loading configuration in to an object model
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

/// Configuration error.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Could not read configuration file {path}: {reason}
    CannotReadFile { path: String, reason: String },

    /// Invalid configuration: {0}
    Invalid(String),

    /// Service '{0}' is listed more than once.
    DuplicateService(String),

    /// execution.timeout must be greater than zero.
    ZeroTimeout,
}

/// The configuration for the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// The services composed into the graph. Empty means every available service.
    #[serde(default)]
    #[builder(default)]
    pub services: Vec<String>,

    /// Configuration options pertaining to plan execution.
    #[serde(default)]
    #[builder(default)]
    pub execution: Execution,

    /// Configuration options pertaining to query planning.
    #[serde(default)]
    #[builder(default)]
    pub planner: Planner,
}

impl Configuration {
    /// Load and validate the YAML configuration at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|err| ConfigurationError::CannotReadFile {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        content.parse()
    }

    pub fn validate(self) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = self
            .services
            .iter()
            .find(|service| !seen.insert(service.as_str()))
        {
            return Err(ConfigurationError::DuplicateService(duplicate.clone()));
        }
        if self.execution.timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout);
        }
        Ok(self)
    }

    /// Whether `service` takes part in composition.
    pub fn serves(&self, service: &str) -> bool {
        self.services.is_empty() || self.services.iter().any(|name| name == service)
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str::<Configuration>(s)
            .map_err(|err| ConfigurationError::Invalid(err.to_string()))?
            .validate()
    }
}

/// Configuration options pertaining to plan execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Execution {
    /// How many times a service call is retried after a transport failure.
    /// Defaults to 1.
    #[serde(default = "default_retries")]
    #[builder(default_code = "default_retries()")]
    pub retries: usize,

    /// Deadline of a single service call, in human-readable format.
    /// Defaults to 30s.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    #[builder(default_code = "default_timeout()")]
    pub timeout: Duration,
}

fn default_retries() -> usize {
    1
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for Execution {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configuration options pertaining to query planning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Planner {
    /// How many query plans are cached.
    /// Defaults to 512.
    #[serde(default = "default_cache_limit")]
    #[builder(default_code = "default_cache_limit()")]
    pub cache_limit: usize,
}

fn default_cache_limit() -> usize {
    512
}

impl Default for Planner {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_gateway_config_serde() {
        let result = include_str!("testdata/gateway.yaml").parse::<Configuration>();
        assert_eq!(
            result.unwrap(),
            Configuration::builder()
                .services(vec![
                    "accounts".to_string(),
                    "products".to_string(),
                    "inventory".to_string(),
                    "reviews".to_string(),
                ])
                .execution(
                    Execution::builder()
                        .retries(2)
                        .timeout(Duration::from_millis(1500))
                        .build()
                )
                .planner(Planner::builder().cache_limit(64).build())
                .build()
        );
    }

    #[test]
    fn defaults_apply_to_missing_sections() {
        let configuration = "services: [accounts]".parse::<Configuration>().unwrap();
        assert_eq!(configuration.execution.retries, 1);
        assert_eq!(configuration.execution.timeout, Duration::from_secs(30));
        assert_eq!(configuration.planner.cache_limit, 512);
        assert!(configuration.serves("accounts"));
        assert!(!configuration.serves("reviews"));

        let empty = "{}".parse::<Configuration>().unwrap();
        assert_eq!(empty, Configuration::default());
        assert!(empty.serves("reviews"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = include_str!("testdata/unknown_field.yaml").parse::<Configuration>();
        assert!(matches!(result, Err(ConfigurationError::Invalid(_))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_eq!(
            "services: [accounts, reviews, accounts]".parse::<Configuration>(),
            Err(ConfigurationError::DuplicateService("accounts".to_string()))
        );
        assert_eq!(
            "execution: { timeout: 0s }".parse::<Configuration>(),
            Err(ConfigurationError::ZeroTimeout)
        );
    }

    #[test]
    fn missing_file_is_reported() {
        let result = Configuration::from_file("does/not/exist.yaml");
        assert!(matches!(
            result,
            Err(ConfigurationError::CannotReadFile { .. })
        ));
    }
}
