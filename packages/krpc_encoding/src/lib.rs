//! Wire codec for the KRPC protocol spoken on the mainline DHT.
//!
//! Three layers, leaves first: fixed-width primitives (ids, compact
//! endpoints, packed node records), the bencode value layer, and the typed
//! [`Message`] codec on top. Encoding is bijective for well-formed input;
//! anything malformed decodes to [`InvalidMessage`].

mod addr;
mod errors;
mod messages;
mod node_id;
mod node_info;
mod transaction_id;

pub use crate::{
    addr::{decode_addr, encode_addr, port_from_int, ADDR_LEN},
    errors::{InvalidData, InvalidMessage},
    messages::{ErrorCode, KRPCError, Message, Query, QueryKind, Response, Token},
    node_id::{id_space_end, NodeID, ID_BITS, ID_LEN},
    node_info::{decode_node_list, encode_node_list, NodeInfo, NODE_INFO_LEN},
    transaction_id::{decode_transaction_id, encode_transaction_id, TransactionId},
};
