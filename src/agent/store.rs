//! Write path — validation, append-only insert, logical edit, inference, audit logging.
//!
//! Every write validates both payloads before opening a transaction, then inserts the
//! input row, its paired output row and all child rows in one transaction. Nothing is
//! ever updated in place: [`Agent::edit`] inserts a new record whose `supersedes` points
//! at the original.
//!
//! [`Agent::infer`] is split into [`Agent::prepare_inference`] (read-only),
//! the provider call, and [`Agent::commit_inference`], so that no transaction or lock
//! needs to be held while the provider runs.

use rusqlite::{Connection, Transaction};
use serde::Serialize;
use serde_json::Value;

use super::query::FindQuery;
use super::rows::{insert_row, RowKey};
use super::types::{Payload, Provenance, RecordId};
use super::validate::{validate, validate_partial};
use super::{write_audit_log, Agent};
use crate::codec;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::inference::prompt::build_prompt;
use crate::inference::{InferenceOptions, InferenceProvider};

/// Result of a successful `infer`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inferred {
    pub id: RecordId,
    pub output: Payload,
}

impl Agent {
    /// Validate and append a new record. No embedding is computed.
    pub fn store(&self, conn: &mut Connection, input: &Value, output: &Value) -> Result<RecordId> {
        self.write(conn, input, output, Provenance::Stored, None)
    }

    /// Like [`Agent::store`], for hand-labeled ground truth.
    pub fn reinforce(
        &self,
        conn: &mut Connection,
        input: &Value,
        output: &Value,
    ) -> Result<RecordId> {
        self.write(conn, input, output, Provenance::Reinforced, None)
    }

    /// Store a record together with the embedding of its input.
    ///
    /// The embedding is computed before the transaction opens; record and vector
    /// commit together.
    pub fn store_embedded(
        &self,
        conn: &mut Connection,
        input: &Value,
        output: &Value,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<RecordId> {
        validate(&self.input.descriptor, input)?;
        validate(&self.output.descriptor, output)?;
        let text = self.embedding_text(&as_payload(input)?);
        let vector = embedder
            .embed(&text)
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        self.write(conn, input, output, Provenance::Stored, Some(&vector))
    }

    /// Generate an output for `input` with `provider`, validate it, and store the pair.
    ///
    /// A provider failure surfaces as [`Error::Inference`] and writes nothing.
    pub fn infer(
        &self,
        conn: &mut Connection,
        input: &Value,
        options: &InferenceOptions,
        provider: &dyn InferenceProvider,
    ) -> Result<Inferred> {
        let prompt = self.prepare_inference(conn, input, options)?;
        let completion = provider
            .complete(&prompt, options)
            .map_err(|e| Error::Inference(format!("{e:#}")))?;
        self.commit_inference(conn, input, &completion)
    }

    /// Validate `input` and build the prompt, with up to `options.examples` recent
    /// reinforced records as demonstrations. Read-only.
    pub fn prepare_inference(
        &self,
        conn: &Connection,
        input: &Value,
        options: &InferenceOptions,
    ) -> Result<String> {
        validate(&self.input.descriptor, input)?;
        let examples = if options.examples > 0 {
            self.query(conn, &FindQuery::new().provenance(Provenance::Reinforced))?
                .latest(options.examples)?
        } else {
            Vec::new()
        };
        Ok(build_prompt(
            &self.input.descriptor,
            &self.output.descriptor,
            &as_payload(input)?,
            &examples,
        ))
    }

    /// Decode a completion for `input` and store the pair as an inferred record.
    pub fn commit_inference(
        &self,
        conn: &mut Connection,
        input: &Value,
        completion: &str,
    ) -> Result<Inferred> {
        let output = codec::decode(completion, &self.output.descriptor)?;
        let id = self.write(
            conn,
            input,
            &Value::Object(output.clone()),
            Provenance::Inferred,
            None,
        )?;
        Ok(Inferred { id, output })
    }

    /// Append a new record carrying `id`'s fields merged with the given overrides.
    ///
    /// The original row is left untouched; the new record inherits its provenance.
    pub fn edit(
        &self,
        conn: &mut Connection,
        id: RecordId,
        input: Option<&Value>,
        output: Option<&Value>,
    ) -> Result<RecordId> {
        if let Some(overrides) = input {
            validate_partial(&self.input.descriptor, overrides)?;
        }
        if let Some(overrides) = output {
            validate_partial(&self.output.descriptor, overrides)?;
        }

        let tx = conn.transaction()?;
        let original = self.get(&tx, id)?;

        let merged_input = merge(original.input, input);
        let merged_output = merge(original.output, output);
        validate(&self.input.descriptor, &Value::Object(merged_input.clone()))?;
        validate(&self.output.descriptor, &Value::Object(merged_output.clone()))?;

        let new_id = self.insert_record(
            &tx,
            &merged_input,
            &merged_output,
            original.provenance,
            Some(id),
        )?;
        write_audit_log(
            &tx,
            &self.name,
            "edit",
            Some(new_id),
            Some(&serde_json::json!({"supersedes": id})),
        )?;
        tx.commit()?;

        tracing::info!(agent = %self.name, id = new_id, supersedes = id, "record edited");
        Ok(new_id)
    }

    fn write(
        &self,
        conn: &mut Connection,
        input: &Value,
        output: &Value,
        provenance: Provenance,
        vector: Option<&[f32]>,
    ) -> Result<RecordId> {
        validate(&self.input.descriptor, input)?;
        validate(&self.output.descriptor, output)?;
        if let Some(vector) = vector {
            self.vectors.check(vector)?;
        }
        let input = as_payload(input)?;
        let output = as_payload(output)?;

        let tx = conn.transaction()?;
        let id = self.insert_record(&tx, &input, &output, provenance, None)?;
        if let Some(vector) = vector {
            self.vectors.upsert(&tx, id, vector)?;
        }
        write_audit_log(
            &tx,
            &self.name,
            "create",
            Some(id),
            Some(&serde_json::json!({"provenance": provenance.as_str()})),
        )?;
        tx.commit()?;

        tracing::info!(agent = %self.name, id, provenance = %provenance, "record stored");
        Ok(id)
    }

    fn insert_record(
        &self,
        tx: &Transaction,
        input: &Payload,
        output: &Payload,
        provenance: Provenance,
        supersedes: Option<RecordId>,
    ) -> Result<RecordId> {
        let now = chrono::Utc::now().to_rfc3339();
        let id = insert_row(
            tx,
            &self.input.table,
            RowKey::Record {
                created_at: &now,
                supersedes,
                provenance,
            },
            input,
        )?;
        insert_row(tx, &self.output.table, RowKey::Paired(id), output)?;
        Ok(id)
    }
}

fn as_payload(value: &Value) -> Result<Payload> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| Error::validation("$", "expected object"))
}

fn merge(mut base: Payload, overrides: Option<&Value>) -> Payload {
    if let Some(Value::Object(overrides)) = overrides {
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind, TypeDescriptor};
    use serde_json::json;

    fn qa(conn: &mut Connection) -> Agent {
        Agent::init(
            conn,
            "qa",
            TypeDescriptor::new(vec![Field::required("question", FieldKind::string())]),
            TypeDescriptor::new(vec![
                Field::required("answer", FieldKind::string()),
                Field::required("confidence", FieldKind::number()),
            ]),
            4,
        )
        .unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn first_store_returns_id_one() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = qa(&mut conn);
        let id = agent
            .store(
                &mut conn,
                &json!({"question": "2+2?"}),
                &json!({"answer": "4", "confidence": 0.99}),
            )
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(count(&conn, "qa_input"), 1);
        assert_eq!(count(&conn, "qa_output"), 1);
    }

    #[test]
    fn invalid_output_writes_nothing() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = qa(&mut conn);
        let err = agent
            .store(
                &mut conn,
                &json!({"question": "2+2?"}),
                &json!({"answer": "4", "confidence": "high"}),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref path, .. } if path == "confidence"));
        assert_eq!(count(&conn, "qa_input"), 0);
    }

    #[test]
    fn edit_merges_and_keeps_original() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = qa(&mut conn);
        let id = agent
            .reinforce(
                &mut conn,
                &json!({"question": "2+2?"}),
                &json!({"answer": "5", "confidence": 0.2}),
            )
            .unwrap();

        let new_id = agent
            .edit(&mut conn, id, None, Some(&json!({"answer": "4"})))
            .unwrap();
        let edited = agent.get(&conn, new_id).unwrap();
        assert_eq!(edited.supersedes, Some(id));
        assert_eq!(edited.provenance, Provenance::Reinforced);
        assert_eq!(edited.output["answer"], json!("4"));
        assert_eq!(edited.output["confidence"], json!(0.2));

        let original = agent.get(&conn, id).unwrap();
        assert_eq!(original.output["answer"], json!("5"));
    }

    #[test]
    fn edit_unknown_id_is_not_found() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = qa(&mut conn);
        let err = agent
            .edit(&mut conn, 42, Some(&json!({"question": "?"})), None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(42)));
    }

    #[test]
    fn edit_rejects_invalid_override() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = qa(&mut conn);
        let id = agent
            .store(
                &mut conn,
                &json!({"question": "q"}),
                &json!({"answer": "a", "confidence": 1.0}),
            )
            .unwrap();
        let err = agent
            .edit(&mut conn, id, None, Some(&json!({"confidence": null})))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(count(&conn, "qa_input"), 1);
    }

    #[test]
    fn commit_inference_decodes_and_marks_provenance() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = qa(&mut conn);
        let inferred = agent
            .commit_inference(
                &mut conn,
                &json!({"question": "2+2?"}),
                "```json\n{\"answer\": \"4\", \"confidence\": 0.9}\n```",
            )
            .unwrap();
        let record = agent.get(&conn, inferred.id).unwrap();
        assert_eq!(record.provenance, Provenance::Inferred);
        assert_eq!(record.output, inferred.output);
    }
}
