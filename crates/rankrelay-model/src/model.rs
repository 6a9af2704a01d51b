//! Ranking model trait and the order-preserving fallback.
//!
//! The `Model` trait abstracts over relevance ranking. Implementations:
//! - `UnigramModel`: learned per-token weights, trained from client feedback
//! - `PassthroughModel`: keeps upstream order, learns nothing

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;

use rankrelay_core::{Choices, Labels, Query, Ranks, Result, StatusMap};

/// A ranking model: scores choices against a query and learns from
/// client feedback.
#[async_trait]
pub trait Model: Send + Sync {
    /// Component name used in call tracking and status reports.
    fn name(&self) -> &'static str;

    /// Score each choice against the query. Returns one rank per choice,
    /// index-aligned, higher meaning more relevant.
    async fn rank(&self, query: &Query, choices: &Choices) -> Result<Ranks>;

    /// Adjust the model from labeled feedback. `labels` is index-aligned
    /// with `choices`.
    async fn train(&self, query: &Query, choices: &Choices, labels: &Labels) -> Result<()>;

    /// Append this component's status fragment.
    fn chain_state(&self, state: StatusMap) -> StatusMap;
}

/// Model that preserves the upstream order and learns nothing.
#[derive(Default)]
pub struct PassthroughModel {
    trainings: AtomicU64,
}

impl PassthroughModel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Model for PassthroughModel {
    fn name(&self) -> &'static str {
        "PassthroughModel"
    }

    async fn rank(&self, _query: &Query, choices: &Choices) -> Result<Ranks> {
        let n = choices.len();
        Ok((0..n).map(|i| (n - i) as f32 / n as f32).collect())
    }

    async fn train(&self, _query: &Query, _choices: &Choices, _labels: &Labels) -> Result<()> {
        self.trainings.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn chain_state(&self, mut state: StatusMap) -> StatusMap {
        state.insert(
            self.name().to_string(),
            json!({ "trainings": self.trainings.load(Ordering::Relaxed) }),
        );
        state
    }
}
