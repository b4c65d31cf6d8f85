use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::services::booking_flow::BookingFlow;
use crate::services::query_cache::QueryClient;

struct TrackedFlow {
    flow: Arc<BookingFlow>,
    last_used: Instant,
}

// Booking flows by id. Flows untouched for `idle_after` are dropped by
// `sweep`; a handler already holding one keeps its `Arc`.
pub struct FlowRegistry {
    flows: Mutex<HashMap<String, TrackedFlow>>,
    idle_after: Duration,
}

impl FlowRegistry {
    pub fn new(idle_after: Duration) -> Self {
        Self {
            flows: Mutex::new(HashMap::new()),
            idle_after,
        }
    }

    fn flows(&self) -> MutexGuard<'_, HashMap<String, TrackedFlow>> {
        self.flows.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, id: String, flow: Arc<BookingFlow>) {
        self.sweep();
        self.flows().insert(
            id,
            TrackedFlow {
                flow,
                last_used: Instant::now(),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<Arc<BookingFlow>> {
        let mut flows = self.flows();
        let tracked = flows.get_mut(id)?;
        tracked.last_used = Instant::now();
        Some(Arc::clone(&tracked.flow))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<BookingFlow>> {
        self.flows().remove(id).map(|tracked| tracked.flow)
    }

    pub fn sweep(&self) -> usize {
        let mut flows = self.flows();
        let before = flows.len();
        flows.retain(|_, tracked| tracked.last_used.elapsed() < self.idle_after);
        let expired = before - flows.len();
        if expired > 0 {
            tracing::info!(expired, remaining = flows.len(), "expired idle booking flows");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.flows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub queries: Arc<QueryClient>,
    pub flows: FlowRegistry,
}

impl AppState {
    pub fn new(config: AppConfig, queries: Arc<QueryClient>) -> Self {
        let flows = FlowRegistry::new(Duration::from_secs(config.flow_idle_secs));
        Self {
            config,
            queries,
            flows,
        }
    }
}
