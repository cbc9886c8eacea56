use crate::errors::InvalidData;
use num_bigint::BigUint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the id space in bits.
pub const ID_BITS: usize = 160;

/// Wire width of an encoded id in bytes.
pub const ID_LEN: usize = 20;

/// Identifier of a node or resource in the DHT keyspace.
///
/// Ids are unsigned integers; the valid range is `[0, 2^160)`. The range is
/// checked when an id is put on the wire, not at construction, so callers can
/// build an out-of-range id and watch it fail to encode.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeID(BigUint);

impl NodeID {
    pub fn new(value: BigUint) -> NodeID {
        NodeID(value)
    }

    /// Generates a uniformly random id.
    pub fn random() -> NodeID {
        let mut bytes = [0u8; ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeID(BigUint::from_bytes_be(&bytes))
    }

    /// Decodes a network-format id string. Exactly 20 bytes.
    pub fn decode(bytes: &[u8]) -> Result<NodeID, InvalidData> {
        if bytes.len() != ID_LEN {
            return Err(InvalidData::BadIdLength(bytes.len()));
        }

        Ok(NodeID(BigUint::from_bytes_be(bytes)))
    }

    /// Encodes into the 20-byte big-endian network format, left padded with
    /// zeros.
    pub fn encode(&self) -> Result<[u8; ID_LEN], InvalidData> {
        if self.0 >= id_space_end() {
            return Err(InvalidData::IdOutOfRange(self.0.clone()));
        }

        let bytes = self.0.to_bytes_be();
        let mut encoded = [0u8; ID_LEN];
        encoded[ID_LEN - bytes.len()..].copy_from_slice(&bytes);
        Ok(encoded)
    }

    /// XOR distance to `other`. The total order on distances is the
    /// arithmetic order of the resulting integers.
    pub fn distance(&self, other: &NodeID) -> BigUint {
        &self.0 ^ &other.0
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

/// First integer past the id space, `2^160`.
pub fn id_space_end() -> BigUint {
    BigUint::from(1u8) << ID_BITS
}

impl Default for NodeID {
    fn default() -> NodeID {
        NodeID(BigUint::default())
    }
}

impl From<u64> for NodeID {
    fn from(value: u64) -> NodeID {
        NodeID(BigUint::from(value))
    }
}

impl From<BigUint> for NodeID {
    fn from(value: BigUint) -> NodeID {
        NodeID(value)
    }
}

impl fmt::Display for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Debug for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID({:x})", self.0)
    }
}
