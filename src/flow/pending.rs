//! Flows waiting for their next step, keyed by flow id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a flow may sit without a step before it is dropped.
pub const FLOW_TTL: Duration = Duration::from_secs(60 * 60);

struct PendingFlow<F> {
    flow: F,
    touched: Instant,
}

pub struct PendingFlows<F> {
    ttl: Duration,
    flows: HashMap<String, PendingFlow<F>>,
}

impl<F> PendingFlows<F> {
    pub fn new(ttl: Duration) -> Self {
        PendingFlows {
            ttl,
            flows: HashMap::new(),
        }
    }

    /// Store a new flow and return its id.
    pub fn add(&mut self, flow: F) -> String {
        let flow_id = uuid::Uuid::new_v4().simple().to_string();
        self.put_back(flow_id.clone(), flow);
        flow_id
    }

    /// Store `flow` again after one of its steps ran.
    pub fn put_back(&mut self, flow_id: String, flow: F) {
        self.evict_expired();
        self.flows.insert(
            flow_id,
            PendingFlow {
                flow,
                touched: Instant::now(),
            },
        );
    }

    /// Take a flow out to run a step. Expired flows are gone.
    pub fn take(&mut self, flow_id: &str) -> Option<F> {
        let pending = self.flows.remove(flow_id)?;
        if pending.touched.elapsed() > self.ttl {
            log::debug!("flow {} expired", flow_id);
            return None;
        }
        Some(pending.flow)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.flows.retain(|flow_id, pending| {
            let keep = pending.touched.elapsed() <= ttl;
            if !keep {
                log::debug!("dropping stale flow {}", flow_id);
            }
            keep
        });
    }
}
