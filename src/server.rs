//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that wire up the database,
//! the configured agent, both collaborators, and the MCP tool handler into a running
//! server.

use anyhow::{Context, Result};
use pairstore::config::PairstoreConfig;
use pairstore::embedding::{self, EmbeddingProvider};
use pairstore::inference::{self, InferenceProvider};
use pairstore::{db, Agent};
use rmcp::ServiceExt;
use std::sync::{Arc, Mutex};

use crate::tools::PairstoreTools;

struct SharedState {
    db: Arc<Mutex<rusqlite::Connection>>,
    agent: Arc<Agent>,
    embedding: Arc<dyn EmbeddingProvider>,
    inference: Arc<dyn InferenceProvider>,
    config: Arc<PairstoreConfig>,
}

impl SharedState {
    fn tools(&self) -> PairstoreTools {
        PairstoreTools::new(
            Arc::clone(&self.db),
            Arc::clone(&self.agent),
            Arc::clone(&self.embedding),
            Arc::clone(&self.inference),
            Arc::clone(&self.config),
        )
    }
}

/// Shared setup: open DB, migrate the agent, create providers, check model version.
///
/// Blocking (SQLite, blocking HTTP clients); run it off the async runtime.
fn setup_shared_state(config: PairstoreConfig) -> Result<SharedState> {
    let db_path = config.resolved_db_path();
    let mut conn = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    let agent = crate::cli::load_agent(&mut conn, &config)?;

    // Check for embedding model mismatch
    if let Ok(Some(stored_model)) = db::migrations::get_embedding_model(&conn) {
        if stored_model != config.embedding.model {
            tracing::warn!(
                stored = %stored_model,
                configured = %config.embedding.model,
                "embedding model changed — run `pairstore reindex` after clearing vectors"
            );
        }
    } else {
        db::migrations::set_embedding_model(&conn, &config.embedding.model)?;
    }

    let embedding: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    let inference: Arc<dyn InferenceProvider> =
        Arc::from(inference::create_provider(&config.inference)?);
    tracing::info!(agent = %agent.name(), "providers ready");

    Ok(SharedState {
        db: Arc::new(Mutex::new(conn)),
        agent: Arc::new(agent),
        embedding,
        inference,
        config: Arc::new(config),
    })
}

async fn setup(config: PairstoreConfig) -> Result<SharedState> {
    tokio::task::spawn_blocking(move || setup_shared_state(config))
        .await
        .context("setup task failed")?
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: PairstoreConfig) -> Result<()> {
    tracing::info!("starting pairstore MCP server on stdio");

    let state = setup(config).await?;
    let transport = rmcp::transport::stdio();

    let server = state.tools().serve(transport).await?;
    tracing::info!("MCP server running — waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over streamable HTTP at `/mcp`.
pub async fn serve_http(config: PairstoreConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    tracing::info!(addr = %bind_addr, "starting pairstore MCP server on HTTP");

    let state = Arc::new(setup(config).await?);

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(state.tools()),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    Ok(())
}
