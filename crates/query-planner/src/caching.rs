use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use crate::model::QueryPlan;
use crate::PlanningError;
use crate::QueryPlanner;

type PlanResult = Result<Arc<QueryPlan>, PlanningError>;

/// The query text and the operation name.
type QueryKey = (String, Option<String>);

/// A query planner wrapper that caches results.
///
/// The query planner performs LRU caching. Planning errors are cached as well: the same query
/// fails the same way until the schema changes, and a schema change builds a new planner.
pub struct CachingQueryPlanner<T: QueryPlanner> {
    delegate: T,
    cached: Mutex<LruCache<QueryKey, PlanResult>>,
}

impl<T: QueryPlanner> fmt::Debug for CachingQueryPlanner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingQueryPlanner")
            .field("delegate", &self.delegate)
            .field("cached", &self.cached.lock().len())
            .finish()
    }
}

impl<T: QueryPlanner> CachingQueryPlanner<T> {
    /// Creates a new query planner that cache the results of another [`QueryPlanner`].
    pub fn new(delegate: T, plan_cache_limit: usize) -> CachingQueryPlanner<T> {
        let limit = NonZeroUsize::new(plan_cache_limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            delegate,
            cached: Mutex::new(LruCache::new(limit)),
        }
    }
}

#[async_trait]
impl<T: QueryPlanner + 'static> QueryPlanner for CachingQueryPlanner<T> {
    async fn get(&self, query: String, operation: Option<String>) -> PlanResult {
        let key = (query, operation);
        let cached = self.cached.lock().get(&key).cloned();
        if let Some(cached) = cached {
            tracing::trace!("query plan cache hit");
            return cached;
        }

        // two concurrent misses may both plan; the second insert wins, with an equal value
        let result = self
            .delegate
            .get(key.0.clone(), key.1.clone())
            .await;
        self.cached.lock().put(key, result.clone());
        result
    }
}
