//! The five request pipelines.
//!
//! Each pipeline is a fixed sequence of collaborator calls. Every call runs
//! through the tracker, and the pipeline as a whole laps once more under
//! `Proxy.<pipeline>`, so the feedback store sees both per-step and
//! end-to-end latency.

use std::sync::Arc;

use tracing::warn;

use rankrelay_codex::Codex;
use rankrelay_core::{CallId, Error, Request, Response, Result, StatusMap};
use rankrelay_db::Db;
use rankrelay_model::Model;
use rankrelay_server::Server;

use crate::tracker::Tracker;

const PROXY_NAME: &str = "Proxy";

/// The proxy's collaborators plus the tracker that laps their calls.
pub struct Pipelines {
    server: Arc<dyn Server>,
    model: Arc<dyn Model>,
    codex: Arc<dyn Codex>,
    db: Arc<dyn Db>,
    tracker: Tracker,
}

impl Pipelines {
    pub fn new(
        server: Arc<dyn Server>,
        model: Arc<dyn Model>,
        codex: Arc<dyn Codex>,
        db: Arc<dyn Db>,
    ) -> Self {
        let tracker = Tracker::new(db.clone());
        Self {
            server,
            model,
            codex,
            db,
            tracker,
        }
    }

    /// Search: magnify the request, ask upstream, parse out the query and
    /// candidates, rank them, save the round trip, pack the response.
    ///
    /// `parse` sees the magnified request; `pack` renders against the
    /// original one so the client gets the count it asked for.
    pub async fn search(&self, req: Request) -> Result<Response> {
        let t = &self.tracker;
        t.track(CallId::new(PROXY_NAME, "search"), async {
            let magnified = t
                .track(
                    CallId::new(self.codex.name(), "magnify"),
                    self.codex.magnify(&req),
                )
                .await?;
            let upstream = t
                .track(
                    CallId::new(self.server.name(), "ask"),
                    self.server.ask(&magnified),
                )
                .await?;
            let (query, choices) = t
                .track(
                    CallId::new(self.codex.name(), "parse"),
                    self.codex.parse(&magnified, &upstream),
                )
                .await?;
            let ranks = t
                .track(
                    CallId::new(self.model.name(), "rank"),
                    self.model.rank(&query, &choices),
                )
                .await?;
            let (qid, cids) = t
                .track(
                    CallId::new(self.db.name(), "save"),
                    self.db.save(&query, &choices),
                )
                .await?;
            t.track(
                CallId::new(self.codex.name(), "pack"),
                self.codex
                    .pack(&req, &upstream, &query, &choices, &ranks, qid, &cids),
            )
            .await
        })
        .await
    }

    /// Train: pluck the persistence ids out of the feedback request, load
    /// the saved round trip, fit the model, acknowledge.
    pub async fn train(&self, req: Request) -> Result<Response> {
        let t = &self.tracker;
        t.track(CallId::new(PROXY_NAME, "train"), async {
            let (qid, cids) = t
                .track(
                    CallId::new(self.codex.name(), "pluck"),
                    self.codex.pluck(&req),
                )
                .await?;
            let (query, choices, labels) = t
                .track(CallId::new(self.db.name(), "get"), self.db.get(qid, &cids))
                .await?;
            t.track(
                CallId::new(self.model.name(), "train"),
                self.model.train(&query, &choices, &labels),
            )
            .await?;
            t.track(CallId::new(self.codex.name(), "ack"), self.codex.ack(qid, &cids))
                .await
        })
        .await
    }

    /// Status: chain each component's fragment into one map, then let the
    /// codex render it. Chain order is fixed: server, codex, model, db.
    pub async fn status(&self, _req: Request) -> Result<Response> {
        self.tracker
            .track(CallId::new(PROXY_NAME, "status"), async {
                let state = StatusMap::new();
                let state = self.server.chain_state(state);
                let state = self.codex.chain_state(state);
                let state = self.model.chain_state(state);
                let state = self.db.chain_state(state);
                Ok(self.codex.pulse(state))
            })
            .await
    }

    /// Anything that matches no route is relayed upstream verbatim.
    pub async fn not_found(&self, req: Request) -> Result<Response> {
        let t = &self.tracker;
        t.track(CallId::new(PROXY_NAME, "not_found"), async {
            t.track(
                CallId::new(self.server.name(), "forward"),
                self.server.forward(&req),
            )
            .await
        })
        .await
    }

    /// Render a failure from any other pipeline as a client response.
    pub async fn error(&self, err: Error) -> Result<Response> {
        warn!("pipeline error ({}): {err}", err.kind());
        let t = &self.tracker;
        t.track(CallId::new(PROXY_NAME, "error"), async {
            t.track(
                CallId::new(self.codex.name(), "catch"),
                self.codex.catch(&err),
            )
            .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use rankrelay_core::{
        Choices, Cid, Handler, Labels, PathBinding, Qid, Query, Ranks, RouteTable,
    };

    #[derive(Default)]
    struct CallLog {
        order: Mutex<Vec<String>>,
        laps: Mutex<Vec<String>>,
    }

    impl CallLog {
        fn called(&self, name: &str) {
            self.order.lock().push(name.to_string());
        }

        fn order(&self) -> Vec<String> {
            self.order.lock().clone()
        }

        fn laps(&self) -> Vec<String> {
            self.laps.lock().clone()
        }
    }

    struct MockServer {
        log: Arc<CallLog>,
    }

    #[async_trait]
    impl Server for MockServer {
        fn name(&self) -> &'static str {
            "MockServer"
        }

        async fn ask(&self, _req: &Request) -> Result<Response> {
            self.log.called("ask");
            Ok(Response::json(200, &json!({"hits": 30})))
        }

        async fn forward(&self, _req: &Request) -> Result<Response> {
            self.log.called("forward");
            Ok(Response::json(200, &json!({"forwarded": true})))
        }

        fn create_app(&self, _table: RouteTable, _not_found: Handler) {}

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn exit(&self) {}

        async fn join(&self) {}

        async fn wait_ready(&self) {}

        fn is_ready(&self) -> bool {
            true
        }

        fn local_addr(&self) -> Option<std::net::SocketAddr> {
            None
        }

        fn chain_state(&self, mut state: StatusMap) -> StatusMap {
            self.log.called("server.chain_state");
            state.insert(self.name().to_string(), json!(true));
            state
        }
    }

    struct MockCodex {
        log: Arc<CallLog>,
    }

    #[async_trait]
    impl Codex for MockCodex {
        fn name(&self) -> &'static str {
            "MockCodex"
        }

        fn search_path(&self) -> PathBinding {
            PathBinding::new("/{index}/_search", &["GET", "POST"])
        }

        fn train_path(&self) -> PathBinding {
            PathBinding::new("/train", &["POST"])
        }

        fn status_path(&self) -> PathBinding {
            PathBinding::new("/status", &["GET"])
        }

        fn error_path(&self) -> PathBinding {
            PathBinding::new("/error", &["POST"])
        }

        async fn magnify(&self, req: &Request) -> Result<Request> {
            self.log.called("magnify");
            Ok(req.clone())
        }

        async fn parse(&self, _req: &Request, _resp: &Response) -> Result<(Query, Choices)> {
            self.log.called("parse");
            Ok((Query("q".into()), vec![json!("a"), json!("b")]))
        }

        async fn pack(
            &self,
            _req: &Request,
            _resp: &Response,
            _query: &Query,
            _choices: &Choices,
            _ranks: &Ranks,
            _qid: Qid,
            _cids: &[Cid],
        ) -> Result<Response> {
            self.log.called("pack");
            Ok(Response::json(200, &json!({"packed": true})))
        }

        async fn pluck(&self, _req: &Request) -> Result<(Qid, Vec<Cid>)> {
            self.log.called("pluck");
            Ok((Qid(1), vec![Cid(2)]))
        }

        async fn ack(&self, qid: Qid, _cids: &[Cid]) -> Result<Response> {
            self.log.called("ack");
            Ok(Response::json(200, &json!({"qid": qid.0})))
        }

        async fn catch(&self, err: &Error) -> Result<Response> {
            self.log.called("catch");
            Ok(Response::json(
                err.status_code(),
                &json!({"error": err.to_string()}),
            ))
        }

        fn pulse(&self, state: StatusMap) -> Response {
            self.log.called("pulse");
            Response::json_pretty(200, &Value::Object(state))
        }

        fn chain_state(&self, mut state: StatusMap) -> StatusMap {
            self.log.called("codex.chain_state");
            state.insert(self.name().to_string(), json!(true));
            state
        }
    }

    struct MockModel {
        log: Arc<CallLog>,
        fail_rank: bool,
        fail_train: bool,
    }

    #[async_trait]
    impl Model for MockModel {
        fn name(&self) -> &'static str {
            "MockModel"
        }

        async fn rank(&self, _query: &Query, choices: &Choices) -> Result<Ranks> {
            self.log.called("rank");
            if self.fail_rank {
                return Err(Error::Model("rank failed".into()));
            }
            Ok(choices.iter().map(|_| 0.5).collect())
        }

        async fn train(&self, _query: &Query, _choices: &Choices, _labels: &Labels) -> Result<()> {
            self.log.called("train");
            if self.fail_train {
                return Err(Error::Model("train failed".into()));
            }
            Ok(())
        }

        fn chain_state(&self, mut state: StatusMap) -> StatusMap {
            self.log.called("model.chain_state");
            state.insert(self.name().to_string(), json!(true));
            state
        }
    }

    struct MockDb {
        log: Arc<CallLog>,
    }

    #[async_trait]
    impl Db for MockDb {
        fn name(&self) -> &'static str {
            "MockDb"
        }

        async fn save(&self, _query: &Query, choices: &Choices) -> Result<(Qid, Vec<Cid>)> {
            self.log.called("save");
            let cids = (0..choices.len()).map(|i| Cid(i as i64 + 1)).collect();
            Ok((Qid(1), cids))
        }

        async fn get(&self, _qid: Qid, _cids: &[Cid]) -> Result<(Query, Choices, Labels)> {
            self.log.called("get");
            Ok((
                Query("q".into()),
                vec![json!("a"), json!("b")],
                Labels(vec![(Cid(1), 0.0), (Cid(2), 1.0)]),
            ))
        }

        fn lap(&self, _ms: f64, call: CallId) {
            self.log.laps.lock().push(call.to_string());
        }

        fn chain_state(&self, mut state: StatusMap) -> StatusMap {
            self.log.called("db.chain_state");
            state.insert(self.name().to_string(), json!(true));
            state
        }
    }

    fn pipelines_with(log: &Arc<CallLog>, fail_rank: bool, fail_train: bool) -> Pipelines {
        Pipelines::new(
            Arc::new(MockServer { log: log.clone() }),
            Arc::new(MockModel {
                log: log.clone(),
                fail_rank,
                fail_train,
            }),
            Arc::new(MockCodex { log: log.clone() }),
            Arc::new(MockDb { log: log.clone() }),
        )
    }

    #[tokio::test]
    async fn search_runs_steps_in_order_and_laps_each() {
        let log = Arc::new(CallLog::default());
        let p = pipelines_with(&log, false, false);
        let resp = p
            .search(Request::new("GET", "/idx/_search?q=a"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(log.order(), ["magnify", "ask", "parse", "rank", "save", "pack"]);
        assert_eq!(
            log.laps(),
            [
                "MockCodex.magnify",
                "MockServer.ask",
                "MockCodex.parse",
                "MockModel.rank",
                "MockDb.save",
                "MockCodex.pack",
                "Proxy.search",
            ]
        );
    }

    #[tokio::test]
    async fn search_failure_still_laps_the_failed_step() {
        let log = Arc::new(CallLog::default());
        let p = pipelines_with(&log, true, false);
        let err = p
            .search(Request::new("GET", "/idx/_search?q=a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert_eq!(log.order(), ["magnify", "ask", "parse", "rank"]);
        assert_eq!(
            log.laps(),
            [
                "MockCodex.magnify",
                "MockServer.ask",
                "MockCodex.parse",
                "MockModel.rank",
                "Proxy.search",
            ]
        );
    }

    #[tokio::test]
    async fn train_runs_steps_in_order() {
        let log = Arc::new(CallLog::default());
        let p = pipelines_with(&log, false, false);
        let resp = p.train(Request::new("POST", "/train")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(log.order(), ["pluck", "get", "train", "ack"]);
        assert_eq!(
            log.laps(),
            [
                "MockCodex.pluck",
                "MockDb.get",
                "MockModel.train",
                "MockCodex.ack",
                "Proxy.train",
            ]
        );
    }

    #[tokio::test]
    async fn train_failure_skips_ack() {
        let log = Arc::new(CallLog::default());
        let p = pipelines_with(&log, false, true);
        let err = p.train(Request::new("POST", "/train")).await.unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert_eq!(log.order(), ["pluck", "get", "train"]);
        assert_eq!(
            log.laps(),
            [
                "MockCodex.pluck",
                "MockDb.get",
                "MockModel.train",
                "Proxy.train",
            ]
        );
    }

    #[tokio::test]
    async fn status_chains_components_in_fixed_order() {
        let log = Arc::new(CallLog::default());
        let p = pipelines_with(&log, false, false);
        let resp = p.status(Request::new("GET", "/status")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(
            log.order(),
            [
                "server.chain_state",
                "codex.chain_state",
                "model.chain_state",
                "db.chain_state",
                "pulse",
            ]
        );
        assert_eq!(log.laps(), ["Proxy.status"]);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        for key in ["MockServer", "MockCodex", "MockModel", "MockDb"] {
            assert_eq!(body[key], json!(true));
        }
    }

    #[tokio::test]
    async fn not_found_forwards_upstream() {
        let log = Arc::new(CallLog::default());
        let p = pipelines_with(&log, false, false);
        let resp = p
            .not_found(Request::new("GET", "/some/other/path"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(log.order(), ["forward"]);
        assert_eq!(log.laps(), ["MockServer.forward", "Proxy.not_found"]);
    }

    #[tokio::test]
    async fn error_renders_through_codex() {
        let log = Arc::new(CallLog::default());
        let p = pipelines_with(&log, false, false);
        let resp = p.error(Error::BadRequest("no query".into())).await.unwrap();
        assert_eq!(resp.status, 400);
        assert_eq!(log.order(), ["catch"]);
        assert_eq!(log.laps(), ["MockCodex.catch", "Proxy.error"]);
    }
}
