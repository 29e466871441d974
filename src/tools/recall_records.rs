//! MCP `recall` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `recall` MCP tool.
///
/// Provide `input` or `output` (input wins when both are given). Filters narrow the
/// candidates before similarity ranking.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecallParams {
    #[schemars(description = "Partial input to find similar records for")]
    pub input: Option<serde_json::Value>,

    #[schemars(description = "Partial output to find similar records for, used when 'input' is absent")]
    pub output: Option<serde_json::Value>,

    #[schemars(description = "Filter over input fields, same syntax as the find tool")]
    pub input_filter: Option<serde_json::Value>,

    #[schemars(description = "Filter over output fields, same syntax as the find tool")]
    pub output_filter: Option<serde_json::Value>,

    #[schemars(description = "Only records of this provenance: 'stored', 'inferred', 'reinforced'")]
    pub provenance: Option<String>,

    #[schemars(description = "Maximum number of results. Defaults to the configured recall.default_k.")]
    pub k: Option<usize>,
}
