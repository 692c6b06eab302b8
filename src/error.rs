//! Error types for the ingestion pipeline.
//!
//! One enum covers all six error kinds named by the governing design
//! (configuration, credential, transport, protocol, state, writer) so
//! callers can match on a single type instead of downcasting across
//! module boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("transport error: {0}")]
    TransportMsg(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("book state error: {0}")]
    State(String),

    #[error("writer error: {0}")]
    Writer(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// True for the two error kinds that must abort startup before any
    /// background thread is spawned.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, IngestError::Configuration(_) | IngestError::Credential(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_fatal_at_startup() {
        let e = IngestError::Configuration("missing --pairs".into());
        assert!(e.is_fatal_at_startup());
    }

    #[test]
    fn protocol_errors_are_not_fatal_at_startup() {
        let e = IngestError::Protocol("unknown channel".into());
        assert!(!e.is_fatal_at_startup());
    }

    #[test]
    fn display_messages_are_actionable() {
        let e = IngestError::Credential("KRAKEN_WS_TOKEN not set".into());
        assert_eq!(e.to_string(), "credential error: KRAKEN_WS_TOKEN not set");
    }
}
