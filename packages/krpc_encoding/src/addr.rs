use crate::errors::InvalidData;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Wire width of a compact endpoint: 4-byte IPv4 address and 2-byte port.
pub const ADDR_LEN: usize = 6;

/// Encodes an endpoint into the 6-byte compact format.
pub fn encode_addr(addr: &SocketAddrV4) -> [u8; ADDR_LEN] {
    let mut encoded = [0u8; ADDR_LEN];
    encoded[..4].copy_from_slice(&addr.ip().octets());
    encoded[4..].copy_from_slice(&addr.port().to_be_bytes());
    encoded
}

/// Decodes a 6-byte compact endpoint.
pub fn decode_addr(bytes: &[u8]) -> Result<SocketAddrV4, InvalidData> {
    if bytes.len() != ADDR_LEN {
        return Err(InvalidData::BadAddressLength(bytes.len()));
    }

    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Ok(SocketAddrV4::new(ip, port))
}

/// Validates a bencoded integer as a UDP port.
pub fn port_from_int(value: i64) -> Result<u16, InvalidData> {
    if !(0..=i64::from(u16::MAX)).contains(&value) {
        return Err(InvalidData::PortOutOfRange(value));
    }

    Ok(value as u16)
}
