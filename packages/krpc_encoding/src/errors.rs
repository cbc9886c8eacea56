use num_bigint::BigUint;
use thiserror::Error;

/// A primitive value lies outside its declared domain.
///
/// These never reach the wire; they fail the offending call locally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidData {
    #[error("node id {0} is outside [0, 2^160)")]
    IdOutOfRange(BigUint),

    #[error("id string has length {0}, expected 20")]
    BadIdLength(usize),

    #[error("port {0} is outside [0, 65536)")]
    PortOutOfRange(i64),

    #[error("endpoint string has length {0}, expected 6")]
    BadAddressLength(usize),
}

/// A datagram or message value could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum InvalidMessage {
    #[error(transparent)]
    Data(#[from] InvalidData),

    #[error("malformed bencode: {0}")]
    Bencode(String),

    #[error("message is not a bencoded dictionary")]
    NotADictionary,

    #[error("missing key {0:?}")]
    MissingKey(&'static str),

    #[error("unexpected type under key {0:?}")]
    WrongType(&'static str),

    #[error("unknown message tag {0:?}")]
    UnknownTag(String),

    #[error("unknown rpc name {0:?}")]
    UnknownRpc(String),

    #[error("transaction id is {0} bytes, expected at most 4")]
    BadTransactionId(usize),

    #[error("error code {0} is not one of 201, 202, 203")]
    BadErrorCode(i64),

    #[error("error payload is not a [code, message] pair")]
    BadErrorPayload,

    #[error("error message is not valid utf-8")]
    BadErrorMessage,

    #[error("nodes string length {0} is not a multiple of 26")]
    BadNodesLength(usize),
}
