//! Transaction engine for KRPC over an unreliable datagram transport.
//!
//! [`KRPCNode::serve`] splits a node into a [`SendTransport`], which sends
//! queries and awaits their replies under per-call deadlines, and a stream
//! of inbound queries for a responder to answer. Replies are matched to
//! their transactions by id; whatever does not match is dropped with a log
//! event.

mod errors;
mod node;
mod send_transport;
pub mod testing;
mod transactions;
mod transport;

pub use crate::{
    errors::QueryError,
    node::{InboundQuery, KRPCNode},
    send_transport::SendTransport,
    transactions::{ActiveTransactions, TransactionResult},
    transport::{PacketTransport, MAX_DATAGRAM_LEN},
};
