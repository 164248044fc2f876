use serde::{Deserialize, Serialize};

use crate::model::{RawGenerationParams, SliderBounds};

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
    #[serde(flatten)]
    pub params: RawGenerationParams,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct WarningResponse {
    pub warning: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    pub model_loaded: bool,
    pub max_length: SliderBounds,
    pub temperature: SliderBounds,
    pub top_p: SliderBounds,
    pub examples: &'static [&'static str],
}
