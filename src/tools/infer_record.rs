use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use pairstore::inference::InferenceOptions;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InferParams {
    #[schemars(description = "Input payload to generate an output for")]
    pub input: serde_json::Value,

    #[schemars(
        description = "Provider options: temperature, model, max_tokens, examples (recent reinforced records shown as demonstrations). Unknown keys are ignored."
    )]
    pub options: Option<InferenceOptions>,

    #[schemars(description = "Embed the input for recall after storing (default: true)")]
    pub embed: Option<bool>,
}
