use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EditParams {
    #[schemars(description = "ID of the record to supersede")]
    pub id: i64,

    #[schemars(description = "Input fields to override; other fields are carried over")]
    pub input: Option<serde_json::Value>,

    #[schemars(description = "Output fields to override; other fields are carried over")]
    pub output: Option<serde_json::Value>,

    #[schemars(description = "Embed the new record for recall (default: true)")]
    pub embed: Option<bool>,
}
