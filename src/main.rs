use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use visium_search::api::{AppState, router};
use visium_search::embedding::{
    ClipEmbedder, EmbeddingClient, FakeEmbedder, RetryPolicy, RetryingEmbedder,
};
use visium_search::ingest::IngestionPipeline;
use visium_search::ranking::RankingEngine;
use visium_search::store::{InMemoryStore, PgVectorStore, TableName, VectorStore};
use visium_search::utils::config::{
    AppConfig, ConfigLoader, EmbeddingConfig, EmbeddingProvider, StoreBackend,
};
use visium_search::utils::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "visium-search", about = "Image similarity search service")]
struct Cli {
    /// TOML configuration file; environment variables override it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overrides `server.bind`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    let mut config = loader.load()?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    init_logging(&config.logging)?;

    let embedder = build_embedder(&config.embedding)?;
    let store = build_store(&config).await?;
    let engine = RankingEngine::new(embedder.clone(), store.clone(), config.engine_settings())
        .context("embedding and store dimensions disagree")?;
    let pipeline = IngestionPipeline::new(embedder, store, config.store.timeout());

    let shutdown = CancellationToken::new();
    let state = AppState {
        engine: Arc::new(engine),
        pipeline: Arc::new(pipeline),
        defaults: config.search.clone(),
        shutdown: shutdown.clone(),
    };

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(addr = %config.server.bind, "search service listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown.cancel();
        })
        .await
        .context("server error")?;
    Ok(())
}

fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    let inner: Arc<dyn EmbeddingClient> = match config.provider {
        EmbeddingProvider::Clip => {
            let mut clip =
                ClipEmbedder::new(&config.endpoint, &config.api_key, config.dimension)?
                    .with_timeouts(config.image_timeout(), config.text_timeout());
            if let Some(deployment) = &config.deployment {
                clip = clip.with_deployment(deployment);
            }
            Arc::new(clip)
        }
        EmbeddingProvider::Fake => Arc::new(FakeEmbedder::new(config.dimension)),
    };
    info!(provider = inner.name(), dimension = config.dimension, "embedding client ready");
    let policy = RetryPolicy::new(config.max_attempts, config.backoff());
    Ok(Arc::new(RetryingEmbedder::new(inner, policy)))
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn VectorStore>> {
    let dim = config.embedding.dimension;
    let store: Arc<dyn VectorStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new(dim)?),
        StoreBackend::Postgres => {
            let url = config
                .store
                .database_url
                .as_deref()
                .context("store.database_url is not set")?;
            let table = TableName::new(&config.store.schema, &config.store.table)?;
            let store = PgVectorStore::connect(url, table, dim)
                .await
                .context("failed to connect to postgres")?;
            if config.store.prepare {
                store.prepare().await.context("failed to prepare vector table")?;
            }
            Arc::new(store)
        }
    };
    info!(store = store.name(), dimension = dim, "vector store ready");
    Ok(store)
}
