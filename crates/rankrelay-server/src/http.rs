//! Axum-backed proxy server.
//!
//! The listener runs in a background task with graceful shutdown driven by
//! a watch channel. Route handlers never see axum types: dispatch converts
//! at the boundary and routes handler errors into the error pipeline.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::{on, MethodFilter};
use axum::Router;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use rankrelay_core::{
    Error, ErrorHandler, Handler, ProxyConfig, Request, Response, Result, RouteTable, StatusMap,
};

use crate::convert;
use crate::server::Server;

/// Timeout for a single upstream round trip.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

struct AppRoutes {
    table: RouteTable,
    not_found: Handler,
}

pub struct HttpServer {
    bind_addr: String,
    upstream: String,
    client: reqwest::Client,
    routes: Mutex<Option<AppRoutes>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    dispatched: Arc<AtomicU64>,
}

impl HttpServer {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let (ready_tx, ready_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            bind_addr: config.bind_addr(),
            upstream: config.upstream_addr(),
            client,
            routes: Mutex::new(None),
            handle: Mutex::new(None),
            local_addr: Mutex::new(None),
            ready_tx,
            ready_rx,
            shutdown_tx,
            shutdown_rx,
            dispatched: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn send_upstream(&self, req: &Request) -> Result<Response> {
        let url = format!("http://{}{}", self.upstream, req.path);
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|e| Error::Http(format!("bad method {}: {e}", req.method)))?;
        let mut builder = self.client.request(method, &url);
        for (name, value) in &req.headers {
            if convert::skip_header(name) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("{} unreachable: {e}", self.upstream)))?;
        let protocol = format!("{:?}", resp.version());
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Upstream(format!("failed reading upstream body: {e}")))?
            .to_vec();
        Ok(Response {
            protocol,
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Server for HttpServer {
    fn name(&self) -> &'static str {
        "HttpServer"
    }

    async fn ask(&self, req: &Request) -> Result<Response> {
        self.send_upstream(req).await
    }

    async fn forward(&self, req: &Request) -> Result<Response> {
        self.send_upstream(req).await
    }

    fn create_app(&self, table: RouteTable, not_found: Handler) {
        *self.routes.lock() = Some(AppRoutes { table, not_found });
    }

    async fn start(&self) -> Result<()> {
        let routes = self
            .routes
            .lock()
            .take()
            .ok_or_else(|| Error::Config("create_app must run before start".to_string()))?;
        let router = build_router(routes, self.dispatched.clone())?;
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let local = listener.local_addr()?;
        *self.local_addr.lock() = Some(local);

        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutdown = async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        };
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("listener terminated: {e}");
            }
        });
        *self.handle.lock() = Some(handle);
        let _ = self.ready_tx.send(true);
        info!("proxy listening on {local}, upstream {}", self.upstream);
        Ok(())
    }

    async fn exit(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn join(&self) {
        // Take the handle out first; the guard must not live across the await.
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn wait_ready(&self) {
        let mut ready_rx = self.ready_rx.clone();
        let _ = ready_rx.wait_for(|ready| *ready).await;
    }

    fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    fn chain_state(&self, mut state: StatusMap) -> StatusMap {
        let bind = self
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| self.bind_addr.clone());
        state.insert(
            self.name().to_string(),
            json!({
                "bind": bind,
                "upstream": self.upstream,
                "ready": self.is_ready(),
                "dispatched": self.dispatched.load(Ordering::Relaxed),
            }),
        );
        state
    }
}

fn build_router(routes: AppRoutes, dispatched: Arc<AtomicU64>) -> Result<Router> {
    let AppRoutes { table, not_found } = routes;
    let on_error = table.error.1.clone();
    let mut router = Router::new();
    for (binding, handler) in [table.search, table.train, table.status] {
        let filter = method_filter(&binding.methods)?;
        let e = on_error.clone();
        let d = dispatched.clone();
        router = router.route(
            &binding.path,
            on(filter, move |req: axum::extract::Request| {
                let h = handler.clone();
                let e = e.clone();
                let d = d.clone();
                async move { dispatch(req, h, e, d).await }
            }),
        );
        info!("route registered: {:?} {}", binding.methods, binding.path);
    }
    router = router.fallback(move |req: axum::extract::Request| {
        let h = not_found.clone();
        let e = on_error.clone();
        let d = dispatched.clone();
        async move { dispatch(req, h, e, d).await }
    });
    Ok(router.layer(TraceLayer::new_for_http()))
}

async fn dispatch(
    req: axum::extract::Request,
    handler: Handler,
    on_error: ErrorHandler,
    dispatched: Arc<AtomicU64>,
) -> axum::response::Response {
    dispatched.fetch_add(1, Ordering::Relaxed);
    let core_req = match convert::into_core_request(req).await {
        Ok(req) => req,
        Err(e) => return caught(&on_error, e).await,
    };
    match handler(core_req).await {
        Ok(resp) => convert::into_axum_response(resp),
        Err(e) => caught(&on_error, e).await,
    }
}

/// Run the error pipeline; if that fails too the client gets a bare 500.
async fn caught(on_error: &ErrorHandler, err: Error) -> axum::response::Response {
    match on_error(err).await {
        Ok(resp) => convert::into_axum_response(resp),
        Err(e) => {
            error!("error pipeline failed: {e}");
            let mut out = axum::response::Response::new(axum::body::Body::from("internal error"));
            *out.status_mut() = axum::http::StatusCode::INTERNAL_SERVER_ERROR;
            out
        }
    }
}

fn method_filter(methods: &[String]) -> Result<MethodFilter> {
    let mut filter: Option<MethodFilter> = None;
    for method in methods {
        let next = match method.as_str() {
            "GET" => MethodFilter::GET,
            "POST" => MethodFilter::POST,
            "PUT" => MethodFilter::PUT,
            "DELETE" => MethodFilter::DELETE,
            "HEAD" => MethodFilter::HEAD,
            "PATCH" => MethodFilter::PATCH,
            "OPTIONS" => MethodFilter::OPTIONS,
            other => return Err(Error::Config(format!("unsupported route method: {other}"))),
        };
        filter = Some(match filter {
            Some(acc) => acc.or(next),
            None => next,
        });
    }
    filter.ok_or_else(|| Error::Config("route binding has no methods".to_string()))
}
