//! Vector maintenance: embedding single records and backfilling missing entries.
//!
//! Records are embedded on the encoded text of their input. Entries can go missing when
//! a process stops between a record's commit and its vector upsert; [`Agent::embed_missing`]
//! rebuilds them from the stored rows.

use rusqlite::Connection;
use serde_json::Value;

use super::types::{Payload, RecordId};
use super::{write_audit_log, Agent};
use crate::codec;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::schema::quote_ident;

impl Agent {
    /// The text a record's input is embedded from.
    pub fn embedding_text(&self, input: &Payload) -> String {
        codec::encode(&Value::Object(input.clone()), &self.input.descriptor)
    }

    /// Embed record `id` and upsert its vector.
    pub fn embed_record(
        &self,
        conn: &Connection,
        id: RecordId,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<()> {
        let record = self.get(conn, id)?;
        let vector = embedder
            .embed(&self.embedding_text(&record.input))
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        self.vectors.upsert(conn, id, &vector)?;
        write_audit_log(conn, &self.name, "embed", Some(id), None)?;
        Ok(())
    }

    /// Active records that have no embedding, ascending.
    pub fn missing_embeddings(&self, conn: &Connection) -> Result<Vec<RecordId>> {
        let input = quote_ident(&self.input.table.name);
        let mut stmt = conn.prepare(&format!(
            "SELECT i.id FROM {input} i \
             WHERE NOT EXISTS (SELECT 1 FROM {vec} v WHERE v.record_id = i.id) \
             AND NOT EXISTS (SELECT 1 FROM {input} s WHERE s.supersedes = i.id) \
             ORDER BY i.id",
            vec = quote_ident(self.vectors.table())
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Embed every active record lacking a vector. `progress` is called after each
    /// record with `(done, total)`. Returns the number embedded.
    pub fn embed_missing(
        &self,
        conn: &Connection,
        embedder: &dyn EmbeddingProvider,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<usize> {
        let ids = self.missing_embeddings(conn)?;
        let total = ids.len();
        for (done, id) in ids.into_iter().enumerate() {
            self.embed_record(conn, id, embedder)?;
            progress(done + 1, total);
        }
        if total > 0 {
            tracing::info!(agent = %self.name, embedded = total, "missing embeddings rebuilt");
        }
        Ok(total)
    }
}
