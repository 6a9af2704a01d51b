//! RankRelay Core — shared types, errors, configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DataPaths, DbKind, ModelKind, ProxyConfig};
pub use error::{Error, Result};
pub use types::{
    CallId, Choices, Cid, ErrorHandler, Handler, HandlerFuture, Labels, PathBinding, Qid, Query,
    Ranks, Request, Response, RouteTable, StatusMap,
};
