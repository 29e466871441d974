//! Fixed-dimension embedding storage with cosine top-k search.
//!
//! Vectors live in a plain table keyed by record id (`<agent>_vec`), so the index is
//! always rebuildable from stored rows and never authoritative. Ranking uses sqlite-vec's
//! `vec_distance_cosine` and only ever scans the candidate set it is handed.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::schema::quote_ident;

/// A ranked hit. Higher `score` is more similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredId {
    pub id: i64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    table: String,
    records: String,
    dimension: usize,
}

impl VectorIndex {
    /// Index stored in `table`, keyed by ids of the `records` table.
    pub fn new(table: impl Into<String>, records: impl Into<String>, dimension: usize) -> Self {
        Self {
            table: table.into(),
            records: records.into(),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the backing table if needed.
    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                record_id INTEGER PRIMARY KEY REFERENCES {}(id) ON DELETE CASCADE,
                embedding BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )",
            quote_ident(&self.table),
            quote_ident(&self.records)
        ))?;
        Ok(())
    }

    /// Reject vectors of the wrong length, with non-finite entries, or with zero norm.
    pub fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidVector("vector has non-finite entries".into()));
        }
        if vector.iter().all(|x| *x == 0.0) {
            return Err(Error::InvalidVector("zero vector has no direction".into()));
        }
        Ok(())
    }

    /// Insert or replace the embedding for `id`.
    pub fn upsert(&self, conn: &Connection, id: i64, vector: &[f32]) -> Result<()> {
        self.check(vector)?;
        let exists: bool = conn.query_row(
            &format!(
                "SELECT COUNT(*) > 0 FROM {} WHERE id = ?1",
                quote_ident(&self.records)
            ),
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::NotFound(id));
        }
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (record_id, embedding, updated_at) VALUES (?1, ?2, ?3)",
                quote_ident(&self.table)
            ),
            params![id, embedding_to_bytes(vector), chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove the embedding for `id`. Returns whether one existed.
    pub fn remove(&self, conn: &Connection, id: i64) -> Result<bool> {
        let rows = conn.execute(
            &format!("DELETE FROM {} WHERE record_id = ?1", quote_ident(&self.table)),
            params![id],
        )?;
        Ok(rows > 0)
    }

    pub fn get(&self, conn: &Connection, id: i64) -> Result<Option<Vec<f32>>> {
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                &format!(
                    "SELECT embedding FROM {} WHERE record_id = ?1",
                    quote_ident(&self.table)
                ),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.map(|b| bytes_to_embedding(&b)))
    }

    pub fn contains(&self, conn: &Connection, id: i64) -> Result<bool> {
        let found: bool = conn.query_row(
            &format!(
                "SELECT COUNT(*) > 0 FROM {} WHERE record_id = ?1",
                quote_ident(&self.table)
            ),
            params![id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// The `k` embeddings most similar to `query`, best first; equal scores order by
    /// smaller id. With `candidates`, only those ids are ranked.
    pub fn top_k(
        &self,
        conn: &Connection,
        query: &[f32],
        k: usize,
        candidates: Option<&[i64]>,
    ) -> Result<Vec<ScoredId>> {
        self.check(query)?;
        if k == 0 || candidates.is_some_and(<[i64]>::is_empty) {
            return Ok(Vec::new());
        }

        let candidate_json = candidates.map(|ids| serde_json::to_string(ids)).transpose()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT record_id, 1.0 - vec_distance_cosine(embedding, ?1) AS score
             FROM {}
             WHERE ?2 IS NULL OR record_id IN (SELECT value FROM json_each(?2))
             ORDER BY score DESC, record_id ASC
             LIMIT ?3",
            quote_ident(&self.table)
        ))?;
        let hits = stmt
            .query_map(
                params![embedding_to_bytes(query), candidate_json, k as i64],
                |row| {
                    Ok(ScoredId {
                        id: row.get(0)?,
                        score: row.get(1)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }
}

/// Little-endian f32 bytes, the layout sqlite-vec reads.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Connection, VectorIndex) {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn.execute_batch("CREATE TABLE recs (id INTEGER PRIMARY KEY AUTOINCREMENT, v TEXT)")
            .unwrap();
        for _ in 0..5 {
            conn.execute("INSERT INTO recs (v) VALUES ('x')", []).unwrap();
        }
        let index = VectorIndex::new("recs_vec", "recs", 4);
        index.ensure(&conn).unwrap();
        (conn, index)
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let (conn, index) = test_db();
        let err = index.upsert(&conn, 1, &[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::Dimension {
                expected: 4,
                actual: 2
            }
        ));
        assert!(matches!(
            index.top_k(&conn, &[1.0; 5], 3, None),
            Err(Error::Dimension { .. })
        ));
    }

    #[test]
    fn zero_vector_is_rejected() {
        let (conn, index) = test_db();
        assert!(matches!(
            index.upsert(&conn, 1, &[0.0; 4]),
            Err(Error::InvalidVector(_))
        ));
    }

    #[test]
    fn upsert_requires_existing_record() {
        let (conn, index) = test_db();
        assert!(matches!(
            index.upsert(&conn, 99, &[1.0, 0.0, 0.0, 0.0]),
            Err(Error::NotFound(99))
        ));
    }

    #[test]
    fn ranks_by_cosine_similarity() {
        let (conn, index) = test_db();
        index.upsert(&conn, 1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.upsert(&conn, 2, &[0.7, 0.7, 0.0, 0.0]).unwrap();
        index.upsert(&conn, 3, &[0.0, 0.0, 1.0, 0.0]).unwrap();

        let hits = index.top_k(&conn, &[1.0, 0.1, 0.0, 0.0], 2, None).unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, [1, 2]);
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].score <= 1.0 + 1e-6);
    }

    #[test]
    fn ties_break_on_smaller_id() {
        let (conn, index) = test_db();
        for id in [4, 2, 3] {
            index.upsert(&conn, id, &[0.0, 1.0, 0.0, 0.0]).unwrap();
        }
        let hits = index.top_k(&conn, &[0.0, 1.0, 0.0, 0.0], 10, None).unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, [2, 3, 4]);
    }

    #[test]
    fn candidates_restrict_the_search() {
        let (conn, index) = test_db();
        index.upsert(&conn, 1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.upsert(&conn, 2, &[0.9, 0.1, 0.0, 0.0]).unwrap();
        index.upsert(&conn, 3, &[0.0, 0.0, 1.0, 0.0]).unwrap();

        let hits = index
            .top_k(&conn, &[1.0, 0.0, 0.0, 0.0], 1, Some(&[3, 2]))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);

        assert!(index
            .top_k(&conn, &[1.0, 0.0, 0.0, 0.0], 5, Some(&[]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn remove_and_cascade() {
        let (conn, index) = test_db();
        index.upsert(&conn, 1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.upsert(&conn, 2, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(index.remove(&conn, 1).unwrap());
        assert!(!index.remove(&conn, 1).unwrap());

        conn.execute("DELETE FROM recs WHERE id = 2", []).unwrap();
        assert_eq!(index.count(&conn).unwrap(), 0);
    }

    #[test]
    fn stored_vectors_round_trip() {
        let (conn, index) = test_db();
        let v = [0.25, -0.5, 0.75, 1.0];
        index.upsert(&conn, 3, &v).unwrap();
        assert_eq!(index.get(&conn, 3).unwrap().unwrap(), v);
        assert!(index.contains(&conn, 3).unwrap());
        assert!(index.get(&conn, 4).unwrap().is_none());
    }
}
