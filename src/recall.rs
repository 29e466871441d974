//! Recall — relational filtering first, then vector ranking over what survived.
//!
//! The query text is the encoded input when one is supplied, otherwise the encoded
//! output. Candidates are the ids matching the query's [`FindQuery`] (active records
//! only, unless history is requested), and only those are ranked, so `k` always counts
//! records that satisfy the filter. An embedding failure fails the recall; there is no
//! fallback to unranked results.

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use crate::agent::query::hydrate;
use crate::agent::validate::validate_partial;
use crate::agent::{Agent, FindQuery, Payload, Record};
use crate::codec;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};

pub const DEFAULT_K: usize = 5;

/// A nearest-neighbour lookup.
///
/// The `input`/`output` fragment is only embedded and ranked against; its fields never
/// narrow the candidate set. Use `filter` for that.
#[derive(Debug, Clone)]
pub struct RecallQuery {
    /// Partial input to match against; takes precedence over `output`.
    pub input: Option<Payload>,
    pub output: Option<Payload>,
    /// Relational pre-filter producing the candidate set.
    pub filter: FindQuery,
    pub k: usize,
}

impl Default for RecallQuery {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            filter: FindQuery::default(),
            k: DEFAULT_K,
        }
    }
}

impl RecallQuery {
    pub fn by_input(input: Payload) -> Self {
        Self {
            input: Some(input),
            ..Self::default()
        }
    }

    pub fn by_output(output: Payload) -> Self {
        Self {
            output: Some(output),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: FindQuery) -> Self {
        self.filter = filter;
        self
    }

    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}

/// A recalled record and its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct Recalled {
    pub record: Record,
    pub score: f64,
}

impl Agent {
    /// The text `query` is embedded from. Validates the supplied fragment.
    pub fn recall_text(&self, query: &RecallQuery) -> Result<String> {
        let (payload, descriptor) = match (&query.input, &query.output) {
            (Some(input), _) => (input, &self.input().descriptor),
            (None, Some(output)) => (output, &self.output().descriptor),
            (None, None) => {
                return Err(Error::validation("$", "recall needs an input or an output"))
            }
        };
        let value = Value::Object(payload.clone());
        validate_partial(descriptor, &value)?;
        Ok(codec::encode(&value, descriptor))
    }

    /// Embed the query with `embedder` and rank the filtered candidates.
    pub fn recall(
        &self,
        conn: &Connection,
        query: &RecallQuery,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Vec<Recalled>> {
        let text = self.recall_text(query)?;
        let vector = embedder
            .embed(&text)
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        self.recall_with_vector(conn, query, &vector)
    }

    /// Rank the filtered candidates against an already computed query vector.
    pub fn recall_with_vector(
        &self,
        conn: &Connection,
        query: &RecallQuery,
        vector: &[f32],
    ) -> Result<Vec<Recalled>> {
        self.vectors().check(vector)?;
        let candidates = self.query(conn, &query.filter)?.ids()?;
        tracing::debug!(
            agent = %self.name(),
            candidates = candidates.len(),
            k = query.k,
            "recall candidates selected"
        );

        let hits = self.vectors().top_k(conn, vector, query.k, Some(&candidates))?;
        let ids: Vec<_> = hits.iter().map(|h| h.id).collect();
        let records = hydrate(conn, self, &ids)?;

        Ok(records
            .into_iter()
            .zip(hits)
            .map(|(record, hit)| Recalled {
                record,
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Filter, Provenance};
    use crate::schema::{Field, FieldKind, TypeDescriptor};
    use serde_json::json;

    fn agent(conn: &mut Connection) -> Agent {
        Agent::init(
            conn,
            "qa",
            TypeDescriptor::new(vec![
                Field::required("question", FieldKind::string()),
                Field::optional("topic", FieldKind::string()),
            ]),
            TypeDescriptor::new(vec![Field::required("answer", FieldKind::string())]),
            4,
        )
        .unwrap()
    }

    fn payload(value: Value) -> Payload {
        value.as_object().unwrap().clone()
    }

    fn seed(conn: &mut Connection, agent: &Agent) -> Vec<i64> {
        let rows = [
            ("2+2?", "math", [1.0, 0.0, 0.0, 0.0]),
            ("capital of France?", "geo", [0.0, 1.0, 0.0, 0.0]),
            ("3+3?", "math", [0.9, 0.1, 0.0, 0.0]),
            ("2+2 again?", "math", [1.0, 0.0, 0.0, 0.0]),
        ];
        rows.iter()
            .map(|(q, topic, v)| {
                let id = agent
                    .store(conn, &json!({"question": q, "topic": topic}), &json!({"answer": "?"}))
                    .unwrap();
                agent.vectors().upsert(conn, id, v).unwrap();
                id
            })
            .collect()
    }

    #[test]
    fn ranks_by_similarity_with_id_tiebreak() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = agent(&mut conn);
        let ids = seed(&mut conn, &agent);

        let query = RecallQuery::by_input(payload(json!({"question": "2+2?"}))).k(3);
        let hits = agent
            .recall_with_vector(&conn, &query, &[1.0, 0.0, 0.0, 0.0])
            .unwrap();
        let got: Vec<i64> = hits.iter().map(|h| h.record.id).collect();
        assert_eq!(got, vec![ids[0], ids[3], ids[2]]);
        assert!(hits[0].score >= hits[2].score);
    }

    #[test]
    fn filter_limits_candidates_before_ranking() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = agent(&mut conn);
        let ids = seed(&mut conn, &agent);

        let query = RecallQuery::by_input(payload(json!({"question": "?"})))
            .filter(FindQuery::new().input(Filter::new().eq("topic", "geo")))
            .k(3);
        let hits = agent
            .recall_with_vector(&conn, &query, &[1.0, 0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, ids[1]);
    }

    #[test]
    fn superseded_and_deleted_records_never_surface() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = agent(&mut conn);
        let ids = seed(&mut conn, &agent);

        agent.delete(&mut conn, ids[0]).unwrap();
        agent
            .edit(&mut conn, ids[3], None, Some(&json!({"answer": "4"})))
            .unwrap();

        let query = RecallQuery::by_input(payload(json!({"question": "2+2?"}))).k(10);
        let hits = agent
            .recall_with_vector(&conn, &query, &[1.0, 0.0, 0.0, 0.0])
            .unwrap();
        let got: Vec<i64> = hits.iter().map(|h| h.record.id).collect();
        assert!(!got.contains(&ids[0]));
        assert!(!got.contains(&ids[3]));
        assert_eq!(got, vec![ids[2], ids[1]]);
        assert!(hits.iter().all(|h| h.record.provenance == Provenance::Stored));
    }

    #[test]
    fn recall_requires_a_side() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = agent(&mut conn);
        let err = agent.recall_text(&RecallQuery::default()).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        let text = agent
            .recall_text(&RecallQuery::by_output(payload(json!({"answer": "4"}))))
            .unwrap();
        assert!(text.contains("answer"));
    }
}
