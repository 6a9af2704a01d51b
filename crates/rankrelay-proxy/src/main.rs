//! RankRelay — search-boosting reverse proxy.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rankrelay_core::{DataPaths, ProxyConfig};
use rankrelay_proxy::Proxy;

#[derive(Parser, Debug)]
#[command(name = "rankrelay", version, about = "Search-boosting reverse proxy")]
struct Args {
    /// Host to bind the proxy listener on.
    #[arg(long, default_value = "127.0.0.1", env = "RANKRELAY_HOST")]
    host: String,

    /// Port to bind the proxy listener on.
    #[arg(long, default_value_t = 53001, env = "RANKRELAY_PORT")]
    port: u16,

    /// Host of the upstream search API.
    #[arg(long, default_value = "127.0.0.1", env = "RANKRELAY_UHOST")]
    uhost: String,

    /// Port of the upstream search API.
    #[arg(long, default_value_t = 54001, env = "RANKRELAY_UPORT")]
    uport: u16,

    /// Model learning rate.
    #[arg(long, default_value_t = 0.01, env = "RANKRELAY_LR")]
    lr: f32,

    /// Directory for the feedback store and model weights.
    #[arg(long, default_value = ".rankrelay", env = "RANKRELAY_DATA_DIR")]
    data_dir: PathBuf,

    /// Factor to multiply requested result counts by before asking upstream.
    #[arg(long, default_value_t = 10, env = "RANKRELAY_MULTIPLIER")]
    multiplier: usize,

    /// Result field the model ranks by (defaults to the whole hit source).
    #[arg(long, env = "RANKRELAY_FIELD")]
    field: Option<String>,

    /// Ranking model: unigram or passthrough.
    #[arg(long, default_value = "unigram", env = "RANKRELAY_MODEL")]
    model: String,

    /// Feedback store: sqlite or memory.
    #[arg(long, default_value = "sqlite", env = "RANKRELAY_DB")]
    db: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ProxyConfig {
        host: args.host,
        port: args.port,
        uhost: args.uhost,
        uport: args.uport,
        lr: args.lr,
        data_paths: DataPaths::new(&args.data_dir)?,
        multiplier: args.multiplier,
        field: args.field,
        model: args.model.parse()?,
        db: args.db.parse()?,
    };

    let proxy = Proxy::new(&config)?;
    proxy.enter().await?;
    proxy.wait_ready().await;
    if let Some(addr) = proxy.local_addr() {
        info!("ready on {addr}, relaying to {}", config.upstream_addr());
    }

    tokio::signal::ctrl_c().await?;
    proxy.exit().await;
    Ok(())
}
