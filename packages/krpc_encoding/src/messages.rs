use crate::{
    addr::{decode_addr, encode_addr, port_from_int},
    errors::InvalidMessage,
    node_id::NodeID,
    node_info::{decode_node_list, encode_node_list, NodeInfo},
    transaction_id::{decode_transaction_id, encode_transaction_id, TransactionId},
};
use num_bigint::BigUint;
use serde_bencode::value::Value;
use std::{collections::HashMap, fmt, net::SocketAddrV4};

/// Opaque credential tying an `announce_peer` to a preceding `get_peers`.
/// On the wire it is a byte string, interpreted as an unsigned integer.
pub type Token = BigUint;

/// A KRPC message, one bencoded dictionary per datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Query(Query),
    Response(Response),
    Error(KRPCError),
}

/// An inbound or outbound query.
///
/// `from` is the id of the querying node; the engine fills it in with its
/// own id before an outbound query hits the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub transaction_id: TransactionId,
    pub from: NodeID,
    pub kind: QueryKind,
}

/// The four RPCs a node understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Ping,
    FindNode {
        target: NodeID,
    },
    GetPeers {
        info_hash: NodeID,
    },
    AnnouncePeer {
        info_hash: NodeID,
        port: u16,
        token: Token,
    },
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueryKind::Ping => "ping",
            QueryKind::FindNode { .. } => "find_node",
            QueryKind::GetPeers { .. } => "get_peers",
            QueryKind::AnnouncePeer { .. } => "announce_peer",
        }
    }
}

/// The data of a reply. `nodes`, `peers`, and `token` are present or absent
/// depending on the originating query.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Response {
    pub transaction_id: TransactionId,
    pub from: NodeID,
    pub nodes: Option<Vec<NodeInfo>>,
    pub peers: Option<Vec<SocketAddrV4>>,
    pub token: Option<Token>,
}

/// An error reply, `[code, message]` on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KRPCError {
    pub transaction_id: TransactionId,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// 201
    Generic,
    /// 202
    Server,
    /// 203
    Protocol,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::Generic => 201,
            ErrorCode::Server => 202,
            ErrorCode::Protocol => 203,
        }
    }

    fn from_code(code: i64) -> Result<ErrorCode, InvalidMessage> {
        match code {
            201 => Ok(ErrorCode::Generic),
            202 => Ok(ErrorCode::Server),
            203 => Ok(ErrorCode::Protocol),
            other => Err(InvalidMessage::BadErrorCode(other)),
        }
    }
}

impl fmt::Display for KRPCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code.code(), self.message)
    }
}

impl Message {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Message::Query(query) => query.transaction_id,
            Message::Response(response) => response.transaction_id,
            Message::Error(error) => error.transaction_id,
        }
    }

    /// Encodes into a bencoded datagram. Dictionaries are emitted with
    /// sorted keys, so encoding a decoded message reproduces the input
    /// byte for byte.
    pub fn encode(&self) -> Result<Vec<u8>, InvalidMessage> {
        let mut dict = HashMap::new();
        dict.insert(
            b"t".to_vec(),
            Value::Bytes(encode_transaction_id(self.transaction_id())),
        );

        match self {
            Message::Query(query) => {
                dict.insert(b"y".to_vec(), Value::Bytes(b"q".to_vec()));
                dict.insert(
                    b"q".to_vec(),
                    Value::Bytes(query.kind.name().as_bytes().to_vec()),
                );
                dict.insert(b"a".to_vec(), encode_arguments(query)?);
            }
            Message::Response(response) => {
                dict.insert(b"y".to_vec(), Value::Bytes(b"r".to_vec()));
                dict.insert(b"r".to_vec(), encode_response_data(response)?);
            }
            Message::Error(error) => {
                dict.insert(b"y".to_vec(), Value::Bytes(b"e".to_vec()));
                dict.insert(
                    b"e".to_vec(),
                    Value::List(vec![
                        Value::Int(error.code.code()),
                        Value::Bytes(error.message.as_bytes().to_vec()),
                    ]),
                );
            }
        }

        serde_bencode::to_bytes(&Value::Dict(dict))
            .map_err(|cause| InvalidMessage::Bencode(cause.to_string()))
    }

    /// Decodes a raw datagram into a typed message.
    pub fn decode(packet: &[u8]) -> Result<Message, InvalidMessage> {
        let value: Value = serde_bencode::from_bytes(packet)
            .map_err(|cause| InvalidMessage::Bencode(cause.to_string()))?;

        let dict = match value {
            Value::Dict(dict) => dict,
            _ => return Err(InvalidMessage::NotADictionary),
        };

        let transaction_id = decode_transaction_id(get_bytes(&dict, "t")?)?;

        match get_bytes(&dict, "y")? {
            b"q" => decode_query(&dict, transaction_id).map(Message::Query),
            b"r" => decode_response(&dict, transaction_id).map(Message::Response),
            b"e" => decode_error(&dict, transaction_id).map(Message::Error),
            other => Err(InvalidMessage::UnknownTag(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

fn encode_arguments(query: &Query) -> Result<Value, InvalidMessage> {
    let mut args = HashMap::new();
    args.insert(
        b"id".to_vec(),
        Value::Bytes(query.from.encode().map_err(InvalidMessage::from)?.to_vec()),
    );

    match &query.kind {
        QueryKind::Ping => {}
        QueryKind::FindNode { target } => {
            args.insert(
                b"target".to_vec(),
                Value::Bytes(target.encode().map_err(InvalidMessage::from)?.to_vec()),
            );
        }
        QueryKind::GetPeers { info_hash } => {
            args.insert(
                b"info_hash".to_vec(),
                Value::Bytes(info_hash.encode().map_err(InvalidMessage::from)?.to_vec()),
            );
        }
        QueryKind::AnnouncePeer {
            info_hash,
            port,
            token,
        } => {
            args.insert(
                b"info_hash".to_vec(),
                Value::Bytes(info_hash.encode().map_err(InvalidMessage::from)?.to_vec()),
            );
            args.insert(b"port".to_vec(), Value::Int(i64::from(*port)));
            args.insert(b"token".to_vec(), Value::Bytes(token.to_bytes_be()));
        }
    }

    Ok(Value::Dict(args))
}

fn encode_response_data(response: &Response) -> Result<Value, InvalidMessage> {
    let mut data = HashMap::new();
    data.insert(
        b"id".to_vec(),
        Value::Bytes(
            response
                .from
                .encode()
                .map_err(InvalidMessage::from)?
                .to_vec(),
        ),
    );

    if let Some(nodes) = &response.nodes {
        data.insert(
            b"nodes".to_vec(),
            Value::Bytes(encode_node_list(nodes).map_err(InvalidMessage::from)?),
        );
    }

    if let Some(peers) = &response.peers {
        data.insert(
            b"values".to_vec(),
            Value::List(
                peers
                    .iter()
                    .map(|peer| Value::Bytes(encode_addr(peer).to_vec()))
                    .collect(),
            ),
        );
    }

    if let Some(token) = &response.token {
        data.insert(b"token".to_vec(), Value::Bytes(token.to_bytes_be()));
    }

    Ok(Value::Dict(data))
}

fn decode_query(
    dict: &HashMap<Vec<u8>, Value>,
    transaction_id: TransactionId,
) -> Result<Query, InvalidMessage> {
    let args = get_dict(dict, "a")?;
    let from = NodeID::decode(get_bytes(args, "id")?)?;

    let kind = match get_bytes(dict, "q")? {
        b"ping" => QueryKind::Ping,
        b"find_node" => QueryKind::FindNode {
            target: NodeID::decode(get_bytes(args, "target")?)?,
        },
        b"get_peers" => QueryKind::GetPeers {
            info_hash: NodeID::decode(get_bytes(args, "info_hash")?)?,
        },
        b"announce_peer" => QueryKind::AnnouncePeer {
            info_hash: NodeID::decode(get_bytes(args, "info_hash")?)?,
            port: port_from_int(get_int(args, "port")?)?,
            token: BigUint::from_bytes_be(get_bytes(args, "token")?),
        },
        other => {
            return Err(InvalidMessage::UnknownRpc(
                String::from_utf8_lossy(other).into_owned(),
            ))
        }
    };

    Ok(Query {
        transaction_id,
        from,
        kind,
    })
}

fn decode_response(
    dict: &HashMap<Vec<u8>, Value>,
    transaction_id: TransactionId,
) -> Result<Response, InvalidMessage> {
    let data = get_dict(dict, "r")?;
    let from = NodeID::decode(get_bytes(data, "id")?)?;

    let nodes = match data.get(b"nodes".as_slice()) {
        None => None,
        Some(Value::Bytes(bytes)) => Some(decode_node_list(bytes)?),
        Some(_) => return Err(InvalidMessage::WrongType("nodes")),
    };

    let peers = match data.get(b"values".as_slice()) {
        None => None,
        Some(Value::List(entries)) => Some(
            entries
                .iter()
                .map(|entry| match entry {
                    Value::Bytes(bytes) => decode_addr(bytes).map_err(InvalidMessage::from),
                    _ => Err(InvalidMessage::WrongType("values")),
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Some(_) => return Err(InvalidMessage::WrongType("values")),
    };

    let token = match data.get(b"token".as_slice()) {
        None => None,
        Some(Value::Bytes(bytes)) => Some(BigUint::from_bytes_be(bytes)),
        Some(_) => return Err(InvalidMessage::WrongType("token")),
    };

    Ok(Response {
        transaction_id,
        from,
        nodes,
        peers,
        token,
    })
}

fn decode_error(
    dict: &HashMap<Vec<u8>, Value>,
    transaction_id: TransactionId,
) -> Result<KRPCError, InvalidMessage> {
    let payload = match dict.get(b"e".as_slice()) {
        Some(Value::List(entries)) => entries,
        Some(_) => return Err(InvalidMessage::WrongType("e")),
        None => return Err(InvalidMessage::MissingKey("e")),
    };

    let (code, message) = match payload.as_slice() {
        [Value::Int(code), Value::Bytes(message)] => (*code, message),
        _ => return Err(InvalidMessage::BadErrorPayload),
    };

    Ok(KRPCError {
        transaction_id,
        code: ErrorCode::from_code(code)?,
        message: String::from_utf8(message.clone())
            .map_err(|_| InvalidMessage::BadErrorMessage)?,
    })
}

fn get<'a>(
    dict: &'a HashMap<Vec<u8>, Value>,
    key: &'static str,
) -> Result<&'a Value, InvalidMessage> {
    dict.get(key.as_bytes())
        .ok_or(InvalidMessage::MissingKey(key))
}

fn get_bytes<'a>(
    dict: &'a HashMap<Vec<u8>, Value>,
    key: &'static str,
) -> Result<&'a [u8], InvalidMessage> {
    match get(dict, key)? {
        Value::Bytes(bytes) => Ok(bytes),
        _ => Err(InvalidMessage::WrongType(key)),
    }
}

fn get_dict<'a>(
    dict: &'a HashMap<Vec<u8>, Value>,
    key: &'static str,
) -> Result<&'a HashMap<Vec<u8>, Value>, InvalidMessage> {
    match get(dict, key)? {
        Value::Dict(inner) => Ok(inner),
        _ => Err(InvalidMessage::WrongType(key)),
    }
}

fn get_int(dict: &HashMap<Vec<u8>, Value>, key: &'static str) -> Result<i64, InvalidMessage> {
    match get(dict, key)? {
        Value::Int(value) => Ok(*value),
        _ => Err(InvalidMessage::WrongType(key)),
    }
}
