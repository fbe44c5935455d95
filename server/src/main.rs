use anyhow::{bail, Result};
use axum::Router;
use clap::Parser;
use search_core::{Bm25Params, DirichletParams, RankingConfig};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};
use server::build_app;
use tokio::net::TcpListener;

#[derive(Parser)]
struct Args {
    /// Index directory path
    #[arg(long, default_value = "./image_index_data")]
    index: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 5001)]
    port: u16,
    /// BM25 term-frequency saturation
    #[arg(long, env = "SEARCH_BM25_K1", default_value_t = 1.2)]
    k1: f64,
    /// BM25 length normalization
    #[arg(long, env = "SEARCH_BM25_B", default_value_t = 0.75)]
    b: f64,
    /// Dirichlet smoothing prior
    #[arg(long, env = "SEARCH_LM_MU", default_value_t = 2000.0)]
    mu: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let ranking = RankingConfig {
        bm25: Bm25Params { k1: args.k1, b: args.b },
        dirichlet: DirichletParams { mu: args.mu },
    };
    if let Err(err) = ranking.validate() {
        bail!("{err}");
    }
    let app: Router = build_app(args.index.clone(), ranking)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
