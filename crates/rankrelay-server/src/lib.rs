//! RankRelay Server — the HTTP face of the proxy.
//!
//! [`Server`] abstracts listening, upstream requests, and routing so the
//! pipeline layer stays transport-agnostic. [`HttpServer`] is the axum
//! implementation used in production.

pub mod convert;
pub mod http;
pub mod server;

pub use http::HttpServer;
pub use server::Server;
