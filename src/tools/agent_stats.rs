//! MCP `stats` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `stats` MCP tool. Takes no arguments.
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct StatsParams {}
