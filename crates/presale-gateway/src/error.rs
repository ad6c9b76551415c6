/// Gateway-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport failure: connection refused, timeout, non-2xx response.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The processor returned a structured refusal.
    #[error("gateway rejected request: {0}")]
    Rejected(String),

    /// The processor answered with something we could not decode.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    /// An inbound notification could not be parsed.
    #[error("malformed callback: {0}")]
    MalformedCallback(String),

    #[error("request encoding error: {0}")]
    Encoding(String),
}

impl GatewayError {
    /// Whether a fresh attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::InvalidResponse(_))
    }
}
