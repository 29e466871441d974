//! MCP tool surface — the store's public operations as request/response tools.
//!
//! Every tool returns a JSON string. Failures are JSON too:
//! `{"error": {"kind": "<code>", "message": "..."}}`, where `kind` is
//! [`pairstore::Error::kind`] (or `internal_error` for task and lock failures).
//!
//! Database work runs in `spawn_blocking` under the connection mutex. Provider calls run
//! in their own `spawn_blocking` with the mutex released, so a slow provider never
//! blocks other tools.

pub mod agent_stats;
pub mod delete_record;
pub mod edit_record;
pub mod find_records;
pub mod infer_record;
pub mod recall_records;
pub mod store_record;

use agent_stats::StatsParams;
use delete_record::DeleteParams;
use edit_record::EditParams;
use find_records::{FindParams, GetParams};
use infer_record::InferParams;
use recall_records::RecallParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use store_record::StoreParams;

use pairstore::config::PairstoreConfig;
use pairstore::embedding::EmbeddingProvider;
use pairstore::inference::InferenceProvider;
use pairstore::{Agent, Error, Filter, FindQuery, Payload, Provenance, RecallQuery, RecordId};

/// Default page for `find` when no limit is given.
const DEFAULT_FIND_LIMIT: usize = 50;

/// The pairstore MCP tool handler. Holds shared state (db connection, the served agent,
/// collaborators, config) and exposes the tools via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct PairstoreTools {
    tool_router: ToolRouter<Self>,
    db: Arc<Mutex<Connection>>,
    agent: Arc<Agent>,
    embedding: Arc<dyn EmbeddingProvider>,
    inference: Arc<dyn InferenceProvider>,
    config: Arc<PairstoreConfig>,
}

#[tool_router]
impl PairstoreTools {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        agent: Arc<Agent>,
        embedding: Arc<dyn EmbeddingProvider>,
        inference: Arc<dyn InferenceProvider>,
        config: Arc<PairstoreConfig>,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            db,
            agent,
            embedding,
            inference,
            config,
        }
    }

    #[tool(description = "Store an input/output pair. Both payloads are validated against the agent's schemas. Returns the new record id.")]
    async fn store(&self, Parameters(params): Parameters<StoreParams>) -> Result<String, String> {
        self.write(params, Provenance::Stored).await
    }

    #[tool(description = "Store a hand-labeled ground-truth input/output pair (provenance 'reinforced'). Reinforced records can be used as inference examples.")]
    async fn reinforce(
        &self,
        Parameters(params): Parameters<StoreParams>,
    ) -> Result<String, String> {
        self.write(params, Provenance::Reinforced).await
    }

    #[tool(description = "Find records by filters over input and output fields. Superseded records are hidden unless include_history is true.")]
    async fn find(&self, Parameters(params): Parameters<FindParams>) -> Result<String, String> {
        let query = find_query(
            params.input.as_ref(),
            params.output.as_ref(),
            params.provenance.as_deref(),
            params.include_history.unwrap_or(false),
        )
        .map_err(|e| error_json(&e))?;
        let limit = params.limit.unwrap_or(DEFAULT_FIND_LIMIT);

        let records = self
            .with_db(move |conn, agent| {
                agent
                    .find(conn, &query)?
                    .take(limit)
                    .collect::<pairstore::Result<Vec<_>>>()
            })
            .await?;

        tracing::info!(count = records.len(), "find completed");
        to_json(&json!({"count": records.len(), "records": records}))
    }

    #[tool(description = "Get one record by id, optionally with its supersession history.")]
    async fn get(&self, Parameters(params): Parameters<GetParams>) -> Result<String, String> {
        let id = params.id;
        if params.history.unwrap_or(false) {
            let chain = self
                .with_db(move |conn, agent| agent.history(conn, id))
                .await?;
            to_json(&json!({"history": chain}))
        } else {
            let record = self.with_db(move |conn, agent| agent.get(conn, id)).await?;
            to_json(&record)
        }
    }

    #[tool(description = "Generate an output for an input with the inference provider, validate it against the output schema, and store the pair. Nothing is written if the provider fails.")]
    async fn infer(&self, Parameters(params): Parameters<InferParams>) -> Result<String, String> {
        let options = params.options.unwrap_or_default();
        let input = params.input;

        // 1. Build the prompt (read-only)
        let (prompt_input, prompt_options) = (input.clone(), options.clone());
        let prompt = self
            .with_db(move |conn, agent| {
                agent.prepare_inference(conn, &prompt_input, &prompt_options)
            })
            .await?;

        // 2. Provider call, no lock held
        let provider = Arc::clone(&self.inference);
        let call_options = options.clone();
        let completion = tokio::task::spawn_blocking(move || {
            provider.complete(&prompt, &call_options)
        })
        .await
        .map_err(|e| internal(format!("inference task failed: {e}")))?
        .map_err(|e| error_json(&Error::Inference(format!("{e:#}"))))?;

        // 3. Decode, validate, store
        let inferred = self
            .with_db(move |conn, agent| agent.commit_inference(conn, &input, &completion))
            .await?;
        let embedded = self.index_if(inferred.id, params.embed).await;

        tracing::info!(id = inferred.id, embedded, "inference stored");
        to_json(&json!({"id": inferred.id, "output": inferred.output, "embedded": embedded}))
    }

    #[tool(description = "Recall the records most similar to a partial input (or output). Filters narrow the candidates before ranking; results are ordered by cosine similarity, ties by smaller id.")]
    async fn recall(&self, Parameters(params): Parameters<RecallParams>) -> Result<String, String> {
        let filter = find_query(
            params.input_filter.as_ref(),
            params.output_filter.as_ref(),
            params.provenance.as_deref(),
            false,
        )
        .map_err(|e| error_json(&e))?;
        let recall = &self.config.recall;
        let query = RecallQuery {
            input: params.input.as_ref().map(as_payload).transpose()?,
            output: params.output.as_ref().map(as_payload).transpose()?,
            filter,
            k: params.k.unwrap_or(recall.default_k).min(recall.max_k),
        };

        let text = self.agent.recall_text(&query).map_err(|e| error_json(&e))?;
        let vector = self.embed_text(text).await?;
        let results = self
            .with_db(move |conn, agent| agent.recall_with_vector(conn, &query, &vector))
            .await?;

        tracing::info!(results = results.len(), "recall completed");
        to_json(&json!({"results": results}))
    }

    #[tool(description = "Edit a record by appending a new record with the given fields overridden. The original is kept and marked superseded.")]
    async fn edit(&self, Parameters(params): Parameters<EditParams>) -> Result<String, String> {
        let EditParams {
            id,
            input,
            output,
            embed,
        } = params;
        let new_id = self
            .with_db(move |conn, agent| agent.edit(conn, id, input.as_ref(), output.as_ref()))
            .await?;
        let embedded = self.index_if(new_id, embed).await;
        to_json(&json!({"id": new_id, "supersedes": id, "embedded": embedded}))
    }

    #[tool(description = "Permanently delete a record, its nested rows, and its embedding.")]
    async fn delete(&self, Parameters(params): Parameters<DeleteParams>) -> Result<String, String> {
        let id = params.id;
        self.with_db(move |conn, agent| agent.delete(conn, id)).await?;
        to_json(&json!({"deleted": id}))
    }

    #[tool(description = "Get agent statistics: record counts by state and provenance, embedded count, schema version.")]
    async fn stats(&self, Parameters(_params): Parameters<StatsParams>) -> Result<String, String> {
        let stats = self.with_db(|conn, agent| agent.stats(conn)).await?;
        to_json(&stats)
    }
}

impl PairstoreTools {
    /// Run `f` against the locked connection on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &Agent) -> pairstore::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let agent = Arc::clone(&self.agent);
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| internal(format!("db lock poisoned: {e}")))?;
            f(&mut *conn, &*agent).map_err(|e| error_json(&e))
        })
        .await
        .map_err(|e| internal(format!("db task failed: {e}")))?
    }

    async fn embed_text(&self, text: String) -> Result<Vec<f32>, String> {
        let provider = Arc::clone(&self.embedding);
        tokio::task::spawn_blocking(move || provider.embed(&text))
            .await
            .map_err(|e| internal(format!("embedding task failed: {e}")))?
            .map_err(|e| error_json(&Error::Embedding(format!("{e:#}"))))
    }

    async fn write(&self, params: StoreParams, provenance: Provenance) -> Result<String, String> {
        let StoreParams {
            input,
            output,
            embed,
        } = params;
        let id = self
            .with_db(move |conn, agent| match provenance {
                Provenance::Reinforced => agent.reinforce(conn, &input, &output),
                _ => agent.store(conn, &input, &output),
            })
            .await?;
        let embedded = self.index_if(id, embed).await;
        to_json(&json!({"id": id, "provenance": provenance, "embedded": embedded}))
    }

    /// Embed a committed record as a second step. A failure leaves the record without
    /// a vector (rebuildable with `pairstore reindex`) and is reported as `false`.
    async fn index_if(&self, id: RecordId, embed: Option<bool>) -> bool {
        if !embed.unwrap_or(true) {
            return false;
        }
        match self.index_record(id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id, error = %e, "record stored without embedding");
                false
            }
        }
    }

    async fn index_record(&self, id: RecordId) -> Result<(), String> {
        let text = self
            .with_db(move |conn, agent| Ok(agent.embedding_text(&agent.get(conn, id)?.input)))
            .await?;
        let vector = self.embed_text(text).await?;
        self.with_db(move |conn, agent| agent.vectors().upsert(conn, id, &vector))
            .await
    }
}

#[tool_handler]
impl ServerHandler for PairstoreTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(format!(
                "pairstore serves the '{}' agent: input/output records validated against fixed \
                 schemas. Use store or reinforce to save pairs, infer to generate outputs, find \
                 and get to read, recall for similarity search, and edit/delete to change records.",
                self.agent.name()
            )),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}

fn find_query(
    input: Option<&Value>,
    output: Option<&Value>,
    provenance: Option<&str>,
    include_history: bool,
) -> pairstore::Result<FindQuery> {
    let provenance = provenance
        .map(|p| p.parse::<Provenance>())
        .transpose()
        .map_err(|e| Error::Validation {
            path: "provenance".into(),
            message: e,
        })?;
    Ok(FindQuery {
        input: input.map(Filter::from_json).transpose()?.unwrap_or_default(),
        output: output.map(Filter::from_json).transpose()?.unwrap_or_default(),
        provenance,
        include_history,
    })
}

fn as_payload(value: &Value) -> Result<Payload, String> {
    value.as_object().cloned().ok_or_else(|| {
        error_json(&Error::Validation {
            path: "$".into(),
            message: "expected object".into(),
        })
    })
}

fn error_json(e: &Error) -> String {
    json!({"error": {"kind": e.kind(), "message": e.to_string()}}).to_string()
}

fn internal(message: String) -> String {
    tracing::error!(%message, "tool failed");
    json!({"error": {"kind": "internal_error", "message": message}}).to_string()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| internal(format!("serialization failed: {e}")))
}
