//! Frame and header codecs shared by the engine and the operations
//!
//! Layouts (all integers big-endian):
//!   handshake: MAGIC (6) | RELEASE_CODE (2)
//!   init:      CMD (2) | BODY_LEN (8) | body
//!   request:   ID (4) | CMD (2) | BODY_LEN (8) | body
//!   response:  ID (4) | STATUS (2) | BODY_LEN (8) | body

use crate::error::{Error, Result};
use crate::node::Node;
use crate::protocol::{HEADER_LEN, MAGIC, MAX_NAME_LEN, NODE_ID_SIZE, RELEASE_CODE};

pub const REQUEST_HEADER_LEN: usize = 4 + 2 + 8;
pub const RESPONSE_HEADER_LEN: usize = 4 + 2 + 8;

/// The 8-byte header each peer sends immediately after connecting.
pub fn handshake_header() -> [u8; HEADER_LEN] {
    let mut hdr = [0u8; HEADER_LEN];
    hdr[..MAGIC.len()].copy_from_slice(MAGIC);
    hdr[MAGIC.len()..].copy_from_slice(&RELEASE_CODE.to_be_bytes());
    hdr
}

/// Validate the peer's handshake header against ours. A magic mismatch
/// means "not this protocol at all"; a release mismatch is a version error.
pub fn check_handshake(theirs: &[u8; HEADER_LEN]) -> Result<()> {
    if &theirs[..MAGIC.len()] != MAGIC {
        return Err(Error::Handshake("header mismatch"));
    }
    if theirs[MAGIC.len()..] != RELEASE_CODE.to_be_bytes() {
        return Err(Error::Handshake("version mismatch"));
    }
    Ok(())
}

/// Header preceding an init command body (pre-session).
pub fn init_header(cmd: u16, body_len: u64) -> [u8; 10] {
    let mut hdr = [0u8; 10];
    hdr[0..2].copy_from_slice(&cmd.to_be_bytes());
    hdr[2..10].copy_from_slice(&body_len.to_be_bytes());
    hdr
}

/// Header preceding a request body.
pub fn request_header(id: u32, cmd: u16, body_len: u64) -> [u8; REQUEST_HEADER_LEN] {
    let mut hdr = [0u8; REQUEST_HEADER_LEN];
    hdr[0..4].copy_from_slice(&id.to_be_bytes());
    hdr[4..6].copy_from_slice(&cmd.to_be_bytes());
    hdr[6..14].copy_from_slice(&body_len.to_be_bytes());
    hdr
}

/// Parsed response header: (request id, status, body length).
pub fn parse_response_header(hdr: &[u8; RESPONSE_HEADER_LEN]) -> (u32, u16, u64) {
    let id = u32::from_be_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
    let status = u16::from_be_bytes([hdr[4], hdr[5]]);
    let len = u64::from_be_bytes([
        hdr[6], hdr[7], hdr[8], hdr[9], hdr[10], hdr[11], hdr[12], hdr[13],
    ]);
    (id, status, len)
}

/// Append a u8-length-prefixed UTF-8 string to a body.
pub fn put_str8(body: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > MAX_NAME_LEN {
        return Err(Error::Encoding(format!("name too long: {} bytes", bytes.len())));
    }
    body.push(bytes.len() as u8);
    body.extend_from_slice(bytes);
    Ok(())
}

/// Forward-only cursor over a response body.
pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BodyReader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Encoding(format!(
                "truncated body: wanted {n} bytes, {} left",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u64_be(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn node(&mut self) -> Result<Node> {
        let b = self.take(NODE_ID_SIZE)?;
        Node::from_slice(b, 0)
    }

    /// u8-length-prefixed UTF-8 string.
    pub fn str8(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Encoding(format!("invalid UTF-8 in name: {e}")))
    }

    /// All bytes left in the body, as a UTF-8 string.
    pub fn rest_str(&mut self) -> Result<String> {
        let bytes = self.take(self.remaining())?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Encoding(format!("invalid UTF-8 in body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_header_layout() {
        let hdr = handshake_header();
        assert_eq!(&hdr[..6], &[0x89, 0x0D, 0x0A, 0x1A, 0xC1, 0xD9]);
        assert_eq!(&hdr[6..], &[0x00, 0x02]); // release code 2, BE
        assert!(check_handshake(&hdr).is_ok());
    }

    #[test]
    fn handshake_magic_mismatch() {
        let mut hdr = handshake_header();
        hdr[0] ^= 0x01;
        let err = check_handshake(&hdr).unwrap_err();
        assert!(matches!(err, Error::Handshake("header mismatch")));
    }

    #[test]
    fn handshake_version_mismatch() {
        let mut hdr = handshake_header();
        hdr[7] = 0x05;
        let err = check_handshake(&hdr).unwrap_err();
        assert!(matches!(err, Error::Handshake("version mismatch")));
    }

    #[test]
    fn request_header_layout() {
        let hdr = request_header(0x01020304, 0x0506, 0x0708);
        assert_eq!(&hdr[0..4], &[1, 2, 3, 4]);
        assert_eq!(&hdr[4..6], &[5, 6]);
        assert_eq!(&hdr[6..14], &[0, 0, 0, 0, 0, 0, 7, 8]);
    }

    #[test]
    fn response_header_round_trip() {
        // A response header has the same shape as a request header with the
        // command field reinterpreted as a status.
        let hdr = request_header(42, 3, 1000);
        let (id, status, len) = parse_response_header(&hdr);
        assert_eq!((id, status, len), (42, 3, 1000));
    }

    #[test]
    fn str8_round_trip() {
        let mut body = Vec::new();
        put_str8(&mut body, "docs").unwrap();
        put_str8(&mut body, "").unwrap();
        let mut rd = BodyReader::new(&body);
        assert_eq!(rd.str8().unwrap(), "docs");
        assert_eq!(rd.str8().unwrap(), "");
        assert!(rd.is_empty());
    }

    #[test]
    fn put_str8_rejects_long_names() {
        let mut body = Vec::new();
        assert!(put_str8(&mut body, &"x".repeat(255)).is_ok());
        assert!(put_str8(&mut body, &"x".repeat(256)).is_err());
    }

    #[test]
    fn reader_guards_truncation() {
        let mut rd = BodyReader::new(&[5, b'a']);
        assert!(rd.str8().is_err());
        let mut rd = BodyReader::new(&[0, 1, 2]);
        assert!(rd.u64_be().is_err());
        assert!(rd.node().is_err());
    }
}
