use krpc_encoding::InvalidData;
use thiserror::Error;
use tokio_krpc::QueryError;

/// The iterator could not make progress.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IterationError {
    /// No seed nodes were supplied and the routing table had none to
    /// offer.
    #[error("no seeds")]
    NoSeeds,

    /// Every outbound query in the round timed out or came back as an
    /// error.
    #[error("all failed")]
    AllFailed,
}

/// Why an inbound query went unanswered. Consumed by the serve loop; the
/// remote sees silence either way.
#[derive(Debug, Error)]
pub(crate) enum RespondError {
    #[error(transparent)]
    Data(#[from] InvalidData),

    #[error(transparent)]
    Send(#[from] QueryError),
}
