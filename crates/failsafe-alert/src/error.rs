use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("{channel}: request failed: {reason}")]
    Request { channel: String, reason: String },

    #[error("{channel}: answered {status}")]
    Status { channel: String, status: u16 },

    #[error("{channel}: timed out")]
    Timeout { channel: String },
}
