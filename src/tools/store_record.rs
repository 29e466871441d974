//! MCP `store` / `reinforce` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `store` and `reinforce` MCP tools.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreParams {
    #[schemars(description = "Input payload; must match the agent's input schema")]
    pub input: serde_json::Value,

    #[schemars(description = "Output payload; must match the agent's output schema")]
    pub output: serde_json::Value,

    #[schemars(description = "Embed the input for recall after storing (default: true)")]
    pub embed: Option<bool>,
}
