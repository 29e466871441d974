//! CLI `reindex` command — embed every active record that has no vector.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use pairstore::config::PairstoreConfig;
use pairstore::{db, embedding};

/// Backfill missing embeddings with the configured provider.
pub async fn reindex(config: PairstoreConfig) -> Result<()> {
    tokio::task::spawn_blocking(move || reindex_blocking(&config))
        .await
        .context("reindex task failed")?
}

fn reindex_blocking(config: &PairstoreConfig) -> Result<()> {
    let (conn, agent) = super::open(config)?;
    let provider = embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?;

    let missing = agent.missing_embeddings(&conn)?.len();
    if missing == 0 {
        println!("Every active record is already embedded.");
        return Ok(());
    }

    println!(
        "Embedding {missing} record(s) with model '{}'...",
        config.embedding.model
    );

    let pb = ProgressBar::new(missing as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );

    let embedded = agent.embed_missing(&conn, provider.as_ref(), |done, _| {
        pb.set_position(done as u64)
    });
    pb.finish_and_clear();
    let embedded = embedded.context("embedding failed; re-run to resume")?;

    db::migrations::set_embedding_model(&conn, &config.embedding.model)?;

    println!(
        "Embedded {embedded} record(s) with model '{}'.",
        config.embedding.model
    );
    Ok(())
}
