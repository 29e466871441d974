use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeleteParams {
    #[schemars(description = "ID of the record to delete permanently, with its embedding")]
    pub id: i64,
}
