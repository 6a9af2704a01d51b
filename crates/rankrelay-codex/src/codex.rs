//! Wire-format transcoder trait.

use async_trait::async_trait;

use rankrelay_core::{
    Choices, Cid, Error, PathBinding, Qid, Query, Ranks, Request, Response, Result, StatusMap,
};

/// Transcoder between one search API dialect and the proxy's neutral
/// vocabulary. Everything dialect-specific lives behind this trait: the
/// routes the proxy claims, how requests are amplified, how candidate
/// results come out of responses, and how reranked results, feedback acks,
/// and errors are rendered back to the client.
#[async_trait]
pub trait Codex: Send + Sync {
    /// Component name used in call tracking and status reports.
    fn name(&self) -> &'static str;

    /// Route the search pipeline is reachable at.
    fn search_path(&self) -> PathBinding;

    /// Route the train pipeline is reachable at.
    fn train_path(&self) -> PathBinding;

    /// Route the status pipeline is reachable at.
    fn status_path(&self) -> PathBinding;

    /// Nominal route for the error pipeline.
    fn error_path(&self) -> PathBinding;

    /// Rewrite the client request to ask upstream for more results.
    async fn magnify(&self, req: &Request) -> Result<Request>;

    /// Extract the query and candidate choices from the upstream response
    /// to a magnified request.
    async fn parse(&self, req: &Request, resp: &Response) -> Result<(Query, Choices)>;

    /// Rebuild the client response: reorder hits by rank, trim to the
    /// originally requested count, and attach persistence ids.
    #[allow(clippy::too_many_arguments)]
    async fn pack(
        &self,
        req: &Request,
        resp: &Response,
        query: &Query,
        choices: &Choices,
        ranks: &Ranks,
        qid: Qid,
        cids: &[Cid],
    ) -> Result<Response>;

    /// Pull persistence ids out of a train request.
    async fn pluck(&self, req: &Request) -> Result<(Qid, Vec<Cid>)>;

    /// Acknowledge applied feedback.
    async fn ack(&self, qid: Qid, cids: &[Cid]) -> Result<Response>;

    /// Render an error as a client response.
    async fn catch(&self, err: &Error) -> Result<Response>;

    /// Render the accumulated status map.
    fn pulse(&self, state: StatusMap) -> Response;

    /// Append this component's status fragment.
    fn chain_state(&self, state: StatusMap) -> StatusMap;
}
