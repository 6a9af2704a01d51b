//! Latency tracking for collaborator calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use rankrelay_core::{CallId, Result};
use rankrelay_db::Db;

/// Times every collaborator call and hands the lap to the feedback store.
/// A failing call is lapped like a successful one; the error passes through
/// untouched.
#[derive(Clone)]
pub struct Tracker {
    db: Arc<dyn Db>,
}

impl Tracker {
    pub fn new(db: Arc<dyn Db>) -> Self {
        Self { db }
    }

    pub async fn track<T, F>(&self, call: CallId, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let out = fut.await;
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        self.db.lap(ms, call);
        out
    }
}
