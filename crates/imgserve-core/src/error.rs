//! Error types for imgserve

/// Result type alias using imgserve's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for imgserve operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Image decoding or transform errors
    #[error("preprocessing error: {0}")]
    Preprocess(String),

    /// Recoverable model invocation errors (scoped to one batch)
    #[error("inference error: {0}")]
    Inference(String),

    /// The model cannot serve any request
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Mapping raw model output to labelled results failed
    #[error("postprocessing error: {0}")]
    Postprocess(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Message transport errors
    #[error("transport error: {0}")]
    Transport(String),

    /// Filesystem/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new preprocessing error
    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new model-unavailable error
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a new postprocessing error
    pub fn postprocess(msg: impl Into<String>) -> Self {
        Self::Postprocess(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error terminates a pipeline instead of a single item or batch
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::ModelUnavailable(_) | Self::Transport(_))
    }
}
