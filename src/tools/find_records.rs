//! MCP `find` / `get` tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `find` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FindParams {
    /// Filter over input fields: `{"field": value}` or `{"field": {"$gte": 1}}`.
    #[schemars(
        description = "Filter over input fields. Equality: {\"field\": value}. Operators: $eq $ne $gt $gte $lt $lte $like $in $null. Dotted paths reach into JSON fields."
    )]
    pub input: Option<serde_json::Value>,

    #[schemars(description = "Filter over output fields, same syntax as 'input'")]
    pub output: Option<serde_json::Value>,

    #[schemars(description = "Only records of this provenance: 'stored', 'inferred', 'reinforced'")]
    pub provenance: Option<String>,

    #[schemars(description = "Include records superseded by an edit (default: false)")]
    pub include_history: Option<bool>,

    #[schemars(description = "Maximum number of records to return. Defaults to 50.")]
    pub limit: Option<usize>,
}

/// Parameters for the `get` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GetParams {
    #[schemars(description = "Record ID")]
    pub id: i64,

    #[schemars(description = "Return the whole supersession chain, newest first (default: false)")]
    pub history: Option<bool>,
}
