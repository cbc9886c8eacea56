use thiserror::Error;

/// Invariant violations inside bucket bookkeeping. These indicate a bug in
/// the caller or the table, never a network condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KBucketError {
    #[error("bucket range is empty")]
    EmptyRange,

    #[error("node id does not fall within the bucket range")]
    OutOfRange,

    #[error("bucket range is too narrow to split")]
    NotSplittable,
}
