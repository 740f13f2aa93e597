use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_async() -> bool {
    true
}

/// Body of `POST /models/` and `PUT /models/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    pub version: u32,
    /// Archive identifier handed to the archive source
    pub id: String,
    /// Answer before download and validation finish
    #[serde(default = "default_async")]
    pub async_request: bool,
}

/// Versions of a model and the files in each version directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    pub model_name: String,
    pub versions: BTreeMap<String, Vec<String>>,
}

/// How a create request finished
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Work continues in the background
    Accepted(String),
    /// The model version was downloaded, validated and queued for registration
    Ready(String),
}
