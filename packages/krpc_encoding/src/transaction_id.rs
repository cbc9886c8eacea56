use crate::errors::InvalidMessage;

/// Identifier correlating an outbound query with its reply.
pub type TransactionId = u32;

/// Encodes a transaction id as its minimal big-endian byte string. Zero
/// still occupies one byte.
pub fn encode_transaction_id(id: TransactionId) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    bytes[first..].to_vec()
}

/// Decodes a big-endian byte string of at most four bytes.
pub fn decode_transaction_id(bytes: &[u8]) -> Result<TransactionId, InvalidMessage> {
    if bytes.len() > 4 {
        return Err(InvalidMessage::BadTransactionId(bytes.len()));
    }

    Ok(bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | TransactionId::from(b)))
}
