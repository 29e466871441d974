//! Record type definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Synthetic auto-incrementing record id, shared by an input row and its output row.
pub type RecordId = i64;

/// An object payload keyed by field name.
pub type Payload = Map<String, Value>;

/// Where a record's output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Written directly through `store`.
    Stored,
    /// Produced by the inference collaborator.
    Inferred,
    /// Hand-labeled ground truth.
    Reinforced,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Inferred => "inferred",
            Self::Reinforced => "reinforced",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stored" => Ok(Self::Stored),
            "inferred" => Ok(Self::Inferred),
            "reinforced" => Ok(Self::Reinforced),
            _ => Err(format!("unknown provenance: {s}")),
        }
    }
}

/// A committed input/output pair. Immutable: edits create a new record whose
/// `supersedes` points here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<RecordId>,
    pub provenance: Provenance,
    pub input: Payload,
    pub output: Payload,
}

impl Record {
    /// Input and output fields merged into one object beside `id`.
    pub fn flatten(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), Value::from(self.id));
        for (k, v) in self.input.iter().chain(self.output.iter()) {
            out.insert(k.clone(), v.clone());
        }
        Value::Object(out)
    }
}
