use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use muse::{ActionProviders, EngineConfig, Muse, OpenAiCompatModel, OpenAiConfig, OpenAiEmbeddings, OpenAiSearch};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod models;
mod state;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "muse-server")]
struct Args {
    #[arg(long, env = "MUSE_DATA_DIR", default_value = "./muse_data")]
    data_dir: PathBuf,

    #[arg(long, env = "MUSE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "MUSE_ADDR", default_value = "0.0.0.0:3000")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,muse=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    tracing::info!("Initializing Muse...");

    let openai = OpenAiConfig::from_env()?;
    let mut providers = ActionProviders::default();
    if let Some(search) = OpenAiSearch::from_config(&openai)? {
        providers = providers.with_search(Arc::new(search));
    }
    let muse = Muse::open(
        &args.data_dir,
        Arc::new(OpenAiCompatModel::new(&openai)?),
        Arc::new(OpenAiEmbeddings::new(&openai)?),
        providers,
        config,
    )
    .await?;
    let state = Arc::new(AppState { muse });

    // Build Router
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/v1/conversations/:id/turns", post(api::post_turn))
        .route("/v1/phase", get(api::get_phase))
        .route("/v1/memories/stale", get(api::get_stale_memories))
        .route("/v1/cache/stats", get(api::get_cache_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Muse server listening on {}", args.addr);

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
