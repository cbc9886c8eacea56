use crate::{
    addr::{decode_addr, encode_addr, ADDR_LEN},
    errors::{InvalidData, InvalidMessage},
    node_id::{NodeID, ID_LEN},
};
use std::net::SocketAddrV4;

/// Wire width of a packed node record: 20-byte id and 6-byte endpoint.
pub const NODE_INFO_LEN: usize = ID_LEN + ADDR_LEN;

/// Contact information for a node, as carried in `nodes` response fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    pub id: NodeID,
    pub address: SocketAddrV4,
}

impl NodeInfo {
    pub fn new(id: NodeID, address: SocketAddrV4) -> NodeInfo {
        NodeInfo { id, address }
    }

    pub fn encode(&self) -> Result<[u8; NODE_INFO_LEN], InvalidData> {
        let mut encoded = [0u8; NODE_INFO_LEN];
        encoded[..ID_LEN].copy_from_slice(&self.id.encode()?);
        encoded[ID_LEN..].copy_from_slice(&encode_addr(&self.address));
        Ok(encoded)
    }

    pub fn decode(bytes: &[u8]) -> Result<NodeInfo, InvalidData> {
        if bytes.len() != NODE_INFO_LEN {
            return Err(InvalidData::BadIdLength(bytes.len()));
        }

        Ok(NodeInfo {
            id: NodeID::decode(&bytes[..ID_LEN])?,
            address: decode_addr(&bytes[ID_LEN..])?,
        })
    }
}

/// Decodes a concatenation of packed node records.
pub fn decode_node_list(bytes: &[u8]) -> Result<Vec<NodeInfo>, InvalidMessage> {
    if bytes.len() % NODE_INFO_LEN != 0 {
        return Err(InvalidMessage::BadNodesLength(bytes.len()));
    }

    bytes
        .chunks(NODE_INFO_LEN)
        .map(|chunk| NodeInfo::decode(chunk).map_err(InvalidMessage::from))
        .collect()
}

/// Encodes node records into their packed concatenation.
pub fn encode_node_list(nodes: &[NodeInfo]) -> Result<Vec<u8>, InvalidData> {
    let mut encoded = Vec::with_capacity(nodes.len() * NODE_INFO_LEN);
    for node in nodes {
        encoded.extend_from_slice(&node.encode()?);
    }
    Ok(encoded)
}
