use thiserror::Error;

pub type WardenResult<T> = Result<T, WardenError>;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("HTML parse failure: {0}")]
    Parse(String),

    #[error("Pattern table error: {0}")]
    Pattern(String),

    #[error("Completion provider timed out after {timeout_ms} ms")]
    ProviderTimeout { timeout_ms: u64 },

    #[error("Completion provider returned malformed response: {0}")]
    ProviderMalformedResponse(String),

    #[error("Completion provider rejected credentials: {0}")]
    ProviderAuth(String),

    #[error("Completion provider request failed: {0}")]
    ProviderRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input exceeds size cap: {size} bytes > {cap} bytes")]
    OversizeInput { size: usize, cap: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl WardenError {
    /// Short stable tag used in `LayerReport::error_detail` and the audit log.
    pub fn tag(&self) -> &'static str {
        match self {
            WardenError::Parse(_) => "ParseError",
            WardenError::Pattern(_) => "PatternError",
            WardenError::ProviderTimeout { .. } => "ProviderTimeout",
            WardenError::ProviderMalformedResponse(_) => "ProviderMalformedResponse",
            WardenError::ProviderAuth(_) => "ProviderAuthError",
            WardenError::ProviderRequest(_) => "ProviderRequestError",
            WardenError::Config(_) => "ConfigError",
            WardenError::OversizeInput { .. } => "OversizeInput",
            WardenError::Io(_) => "IoError",
            WardenError::Serde(_) => "SerdeError",
        }
    }
}
