use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use federation::Service;
use federation::SubgraphRequest;
use federation::SubgraphResponse;

use crate::FetchError;

/// A service the gateway sends sub-queries to.
///
/// Errors are reserved for failures of the call itself. Resolution errors travel inside the
/// [`SubgraphResponse`].
#[async_trait]
pub trait SubgraphClient: Send + Sync + Debug {
    async fn call(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError>;
}

#[async_trait]
impl SubgraphClient for Service {
    async fn call(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError> {
        Ok(self.execute(&request))
    }
}

/// Maintains a map of service names to clients.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn SubgraphClient>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut debug = f.debug_tuple("ServiceRegistry");
        let mut names = self.services.keys().collect::<Vec<_>>();
        names.sort();
        for name in names {
            debug.field(name);
        }
        debug.finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, client: Arc<dyn SubgraphClient>) {
        self.services.insert(name.into(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SubgraphClient>> {
        self.services.get(name).cloned()
    }

    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.services.contains_key(name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl FromIterator<Service> for ServiceRegistry {
    fn from_iter<T: IntoIterator<Item = Service>>(iter: T) -> Self {
        let mut registry = ServiceRegistry::new();
        for service in iter {
            registry.insert(service.name().to_string(), Arc::new(service));
        }
        registry
    }
}
