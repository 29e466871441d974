//! Schema-driven, append-only storage for paired input/output records, with vector recall.
//!
//! An [`Agent`] owns two tables, `<agent>_input` and `<agent>_output`, compiled from a pair
//! of [`TypeDescriptor`]s, plus child tables for nested fields and a vector index keyed by
//! record id. Records are never updated in place: an edit appends a new record that
//! supersedes the old one.
//!
//! # Architecture
//!
//! - **Storage**: SQLite via `rusqlite`, with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   providing cosine distance for recall
//! - **Schemas**: descriptors built directly, from JSON, or from a JSON Schema (`schemars`)
//! - **Migration**: additive only; retired columns are kept, type changes are conflicts
//! - **Collaborators**: embedding and inference providers behind traits, with
//!   OpenAI-compatible HTTP implementations
//! - **Remote mode**: the same operations as MCP tools over stdio or streamable HTTP
//!
//! # Modules
//!
//! - [`schema`] — type descriptors, the schema compiler, and the migration engine
//! - [`agent`] — the append-only store: store, infer, reinforce, edit, find, delete, erase
//! - [`vector`] — fixed-dimension embedding storage with top-k cosine search
//! - [`recall`] — filtered similarity search over an agent's records
//! - [`codec`] — structured-to-text encoding for prompts and responses
//! - [`embedding`] / [`inference`] — external collaborators
//! - [`db`] — connection setup and bookkeeping-table migrations
//! - [`config`] — configuration loading from TOML files and environment variables

pub mod agent;
pub mod codec;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod inference;
pub mod recall;
pub mod schema;
pub mod vector;

pub use agent::{Agent, Filter, FindQuery, Op, Payload, Provenance, Record, RecordId};
pub use error::{Error, Result};
pub use recall::{RecallQuery, Recalled};
pub use schema::{Field, FieldKind, ScalarKind, TypeDescriptor};
