//! Cache wire protocol
//!
//! A connection opens with an ASCII magic string followed by a single zero
//! byte. After that, every request is a fixed 16-byte header of two
//! little-endian u64 fields `(key, size)`:
//!
//! - `size > 0`: upload, exactly `size` body bytes follow on the stream
//! - `size == 0`: download, answered with the same header layout
//!   `(key, result_size)` followed by `result_size` payload bytes
//!
//! The same magic bytes double as the UDP discovery probe and reply.

use byteorder::{ByteOrder, LittleEndian};

/// Protocol identifier expected from every peer, TCP and UDP alike.
pub const PROTOCOL_HEADER: &str = "cache_data_server_1";

/// On-wire handshake length: magic string plus zero terminator.
pub const HANDSHAKE_LEN: usize = PROTOCOL_HEADER.len() + 1;

/// Default TCP port serving cache requests.
pub const DATA_PORT: u16 = 14032;

/// Default UDP port listening for discovery broadcasts.
pub const BROADCAST_PORT: u16 = 14033;

/// Default UDP port on the requester side that discovery replies go to.
pub const INFO_PORT: u16 = 14034;

/// Sanity ceiling for a single upload (250 MiB). Larger advertised sizes
/// are a protocol violation, rejected before any body byte is read.
pub const MAX_BLOB_SIZE: u64 = 250 * 1024 * 1024;

/// Size of a request/response header on the wire.
pub const HEADER_SIZE: usize = 16;

/// The full handshake as sent on the wire.
pub fn handshake_bytes() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HANDSHAKE_LEN);
    bytes.extend_from_slice(PROTOCOL_HEADER.as_bytes());
    bytes.push(0);
    bytes
}

/// Check a received handshake byte-for-byte: magic string, zero terminator,
/// nothing else.
pub fn is_valid_handshake(buf: &[u8]) -> bool {
    buf.len() == HANDSHAKE_LEN
        && &buf[..HANDSHAKE_LEN - 1] == PROTOCOL_HEADER.as_bytes()
        && buf[HANDSHAKE_LEN - 1] == 0
}

/// Request/response header: `(key, size)` as two little-endian u64 fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub key: u64,
    pub size: u64,
}

impl RequestHeader {
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            key: LittleEndian::read_u64(&buf[..8]),
            size: LittleEndian::read_u64(&buf[8..]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        LittleEndian::write_u64(&mut buf[..8], self.key);
        LittleEndian::write_u64(&mut buf[8..], self.size);
        buf
    }
}

/// Ensure `buf` can hold `needed` bytes without reallocating mid-request.
///
/// Capacity doubles (plus one) until sufficient and never shrinks, so one
/// connection's buffer amortizes across many requests of similar size.
pub fn grow(buf: &mut Vec<u8>, needed: usize) {
    let mut cap = buf.capacity();
    if cap >= needed {
        return;
    }
    while cap < needed {
        cap = cap * 2 + 1;
    }
    buf.reserve_exact(cap - buf.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = RequestHeader {
            key: 0xDEAD_BEEF_CAFE_F00D,
            size: 42,
        };
        assert_eq!(RequestHeader::decode(&header.encode()), header);
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = RequestHeader { key: 1, size: 2 };
        let bytes = header.encode();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[8], 2);
        assert!(bytes[1..8].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_handshake_validation() {
        assert!(is_valid_handshake(&handshake_bytes()));

        // No terminator
        assert!(!is_valid_handshake(PROTOCOL_HEADER.as_bytes()));

        // Wrong terminator
        let mut bad = handshake_bytes();
        *bad.last_mut().unwrap() = b'\n';
        assert!(!is_valid_handshake(&bad));

        // Trailing garbage
        let mut long = handshake_bytes();
        long.push(0);
        assert!(!is_valid_handshake(&long));

        // Different magic of the same length
        let mut other = handshake_bytes();
        other[0] ^= 0xFF;
        assert!(!is_valid_handshake(&other));
    }

    #[test]
    fn test_grow_doubles_plus_one() {
        let mut buf: Vec<u8> = Vec::with_capacity(10);
        grow(&mut buf, 100);
        // 10 -> 21 -> 43 -> 87 -> 175
        assert_eq!(buf.capacity(), 175);
    }

    #[test]
    fn test_grow_never_shrinks() {
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        grow(&mut buf, 16);
        assert_eq!(buf.capacity(), 1024);
    }
}
