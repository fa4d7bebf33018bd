use serde::Serialize;

/// Outcome of a single consultation. Always produced: when generation fails
/// the answer carries the error text instead of a real completion.
#[derive(Debug, Clone, Serialize)]
pub struct Consultation {
    pub answer: String,
    /// Normalized category the answer was framed with.
    pub category: String,
}

/// Best-effort description of the loaded model. Introspection failures land
/// in `error` rather than failing the call.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub device: String,
    pub dtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
