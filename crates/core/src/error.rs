/// Result alias that carries the custom [`VisemeError`] type.
pub type Result<T> = std::result::Result<T, VisemeError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VisemeError {
    /// The text to speak was missing or blank.
    #[error("text must not be empty")]
    EmptyInput,
    /// The speech synthesizer answered with a failure or could not be reached.
    #[error("tts service unavailable: {0}")]
    TtsUnavailable(String),
    /// Audio bytes could not be turned into samples.
    #[error("failed to decode audio: {0}")]
    Decode(String),
    /// Numeric failure while building the envelope.
    #[error("failed to process audio: {0}")]
    Processing(String),
    /// The chat completion service failed or is not configured.
    #[error("chat relay failed: {0}")]
    Chat(String),
    /// A configuration file could not be read or holds unusable values.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Free-form message for conditions that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl VisemeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Whether the failure was caused by the caller's input rather than by
    /// the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyInput)
    }
}
