//! Proxy-facing server trait.

use std::net::SocketAddr;

use async_trait::async_trait;

use rankrelay_core::{Handler, Request, Response, Result, RouteTable, StatusMap};

/// The transport seam: listens for client traffic, dispatches it into the
/// installed routing table, and makes upstream calls on behalf of the
/// pipelines.
#[async_trait]
pub trait Server: Send + Sync {
    /// Component name used in call tracking and status reports.
    fn name(&self) -> &'static str;

    /// Send a magnified search request upstream.
    async fn ask(&self, req: &Request) -> Result<Response>;

    /// Relay an unrecognized request upstream verbatim.
    async fn forward(&self, req: &Request) -> Result<Response>;

    /// Install the routing table. Must happen before `start`; calling it
    /// again replaces the table for the next `start`.
    fn create_app(&self, table: RouteTable, not_found: Handler);

    /// Bind the listener and begin serving. Returns once the socket is
    /// bound; serving continues in the background until `exit`.
    async fn start(&self) -> Result<()>;

    /// Begin graceful shutdown.
    async fn exit(&self);

    /// Wait for the serving task to finish.
    async fn join(&self);

    /// Wait until the server accepts traffic.
    async fn wait_ready(&self);

    /// Whether the server accepts traffic.
    fn is_ready(&self) -> bool;

    /// Bound address once started. With port 0 this is the actual port.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Append this component's status fragment.
    fn chain_state(&self, state: StatusMap) -> StatusMap;
}
