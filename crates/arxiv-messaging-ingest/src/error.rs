use thiserror::Error;

/// Failures while decoding a bus message. All of them are terminal for the
/// message: the processor logs and acks so the bus does not redeliver
/// something no retry can fix.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed JSON payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidTimestamp(#[from] arxiv_messaging_core::CoreError),
}
