//! Proxy orchestrator.
//!
//! Builds the four components from configuration, wires the pipelines into
//! the server's routing table, and owns the start/stop lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use rankrelay_codex::{Codex, EsCodex};
use rankrelay_core::{
    Error, ErrorHandler, Handler, HandlerFuture, ProxyConfig, Request, Result, RouteTable,
};
use rankrelay_db::create_db;
use rankrelay_model::create_model;
use rankrelay_server::{HttpServer, Server};

use crate::pipelines::Pipelines;

pub struct Proxy {
    server: Arc<dyn Server>,
}

impl Proxy {
    /// Instantiate the components and hand the routing table to the server.
    /// The codex alone decides which paths the pipelines are reachable at.
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        config.validate()?;

        let server: Arc<dyn Server> = Arc::new(HttpServer::new(config)?);
        let model = create_model(config.model, config.lr, &config.data_paths);
        let codex: Arc<dyn Codex> =
            Arc::new(EsCodex::new(config.multiplier, config.field.clone()));
        let db = create_db(config.db, &config.data_paths)?;

        info!(
            "proxy components: {}",
            json!({
                "server": server.name(),
                "codex": codex.name(),
                "model": model.name(),
                "db": db.name(),
            })
        );

        let search_path = codex.search_path();
        let train_path = codex.train_path();
        let status_path = codex.status_path();
        let error_path = codex.error_path();

        let pipelines = Arc::new(Pipelines::new(server.clone(), model, codex, db));

        let p = pipelines.clone();
        let search: Handler = Arc::new(move |req: Request| -> HandlerFuture {
            let p = p.clone();
            Box::pin(async move { p.search(req).await })
        });
        let p = pipelines.clone();
        let train: Handler = Arc::new(move |req: Request| -> HandlerFuture {
            let p = p.clone();
            Box::pin(async move { p.train(req).await })
        });
        let p = pipelines.clone();
        let status: Handler = Arc::new(move |req: Request| -> HandlerFuture {
            let p = p.clone();
            Box::pin(async move { p.status(req).await })
        });
        let p = pipelines.clone();
        let not_found: Handler = Arc::new(move |req: Request| -> HandlerFuture {
            let p = p.clone();
            Box::pin(async move { p.not_found(req).await })
        });
        let p = pipelines;
        let on_error: ErrorHandler = Arc::new(move |err: Error| -> HandlerFuture {
            let p = p.clone();
            Box::pin(async move { p.error(err).await })
        });

        let table = RouteTable {
            search: (search_path, search),
            train: (train_path, train),
            status: (status_path, status),
            error: (error_path, on_error),
        };
        server.create_app(table, not_found);

        Ok(Self { server })
    }

    /// Bind and start serving in the background.
    pub async fn enter(&self) -> Result<()> {
        self.server.start().await
    }

    /// Stop serving and wait for the listener task to finish.
    pub async fn exit(&self) {
        info!("stopping proxy");
        self.server.exit().await;
        self.server.join().await;
    }

    pub async fn wait_ready(&self) {
        self.server.wait_ready().await;
    }

    pub fn is_ready(&self) -> bool {
        self.server.is_ready()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Start, wait until the listener accepts traffic, run `fut`, then stop
    /// and join regardless of how `fut` came out.
    pub async fn scope<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.enter().await?;
        self.wait_ready().await;
        let out = fut.await;
        self.exit().await;
        Ok(out)
    }
}
