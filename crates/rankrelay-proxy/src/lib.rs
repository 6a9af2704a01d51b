//! RankRelay Proxy — orchestration.
//!
//! Wires server, codex, model, and db into the five tracked pipelines and
//! exposes the proxy lifecycle to the binary and to tests.

pub mod pipelines;
pub mod proxy;
pub mod tracker;

pub use pipelines::Pipelines;
pub use proxy::Proxy;
pub use tracker::Tracker;
