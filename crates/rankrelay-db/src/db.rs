//! Feedback store trait and latency bookkeeping.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use rankrelay_core::{CallId, Choices, Cid, Labels, Qid, Query, Result, StatusMap};

/// Store for search round trips and per-call latency.
#[async_trait]
pub trait Db: Send + Sync {
    /// Component name used in call tracking and status reports.
    fn name(&self) -> &'static str;

    /// Persist a query and its choices. Returns the new qid and one cid per
    /// choice, in choice order.
    async fn save(&self, query: &Query, choices: &Choices) -> Result<(Qid, Vec<Cid>)>;

    /// Load a saved query for training. Choices come back in saved order;
    /// labels are 1.0 for the flagged cids and 0.0 for the rest.
    async fn get(&self, qid: Qid, cids: &[Cid]) -> Result<(Query, Choices, Labels)>;

    /// Record the latency of one tracked call.
    fn lap(&self, ms: f64, call: CallId);

    /// Append this component's status fragment.
    fn chain_state(&self, state: StatusMap) -> StatusMap;
}

/// Latency aggregate for one call identity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LapStats {
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

/// In-memory latency aggregation shared by the store implementations.
#[derive(Default)]
pub(crate) struct LapBoard {
    laps: Mutex<HashMap<CallId, LapStats>>,
}

impl LapBoard {
    pub(crate) fn record(&self, ms: f64, call: CallId) {
        debug!("{call} took {ms:.3}ms");
        let mut laps = self.laps.lock();
        let entry = laps.entry(call).or_default();
        entry.count += 1;
        entry.total_ms += ms;
        if ms > entry.max_ms {
            entry.max_ms = ms;
        }
    }

    /// Status fragment: per-call counts and latency, keyed `component.op`.
    pub(crate) fn fragment(&self) -> Value {
        let laps = self.laps.lock();
        let mut entries: Vec<(String, &LapStats)> =
            laps.iter().map(|(call, stats)| (call.to_string(), stats)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut out = serde_json::Map::new();
        for (key, stats) in entries {
            let avg = if stats.count > 0 {
                stats.total_ms / stats.count as f64
            } else {
                0.0
            };
            out.insert(
                key,
                json!({
                    "count": stats.count,
                    "avg_ms": avg,
                    "max_ms": stats.max_ms,
                }),
            );
        }
        Value::Object(out)
    }
}
