//! RankRelay Codex — wire-format transcoders.
//!
//! A codex owns one search API dialect end to end. `EsCodex` speaks the
//! Elasticsearch `_search` API; other dialects implement the same trait.

pub mod codex;
pub mod elastic;

pub use codex::Codex;
pub use elastic::EsCodex;
