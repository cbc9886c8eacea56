use krpc_encoding::{InvalidMessage, KRPCError};
use thiserror::Error;

/// Ways an outbound query can fail.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query could not be encoded. Reported before anything reaches
    /// the wire; no transaction is recorded.
    #[error("query could not be encoded: {0}")]
    InvalidMessage(#[from] InvalidMessage),

    /// No reply arrived within the deadline.
    #[error("query timed out")]
    Timeout,

    /// The remote answered with a KRPC error message.
    #[error("remote node returned {0}")]
    Remote(KRPCError),
}
