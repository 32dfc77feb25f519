//! Node identifiers and per-node metadata

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::{node_type, rights, NODE_ID_SIZE};

/// Opaque 16-byte identifier naming a remote filesystem object.
///
/// Immutable once obtained; equality is byte-equality. The canonical text
/// form is 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node([u8; NODE_ID_SIZE]);

impl Node {
    pub fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        Node(bytes)
    }

    /// Read a node out of a reply body at `offset`.
    pub fn from_slice(buf: &[u8], offset: usize) -> Result<Self> {
        let end = offset + NODE_ID_SIZE;
        if buf.len() < end {
            return Err(Error::Encoding(format!(
                "truncated node id: {} bytes past offset {}",
                buf.len().saturating_sub(offset),
                offset
            )));
        }
        let mut id = [0u8; NODE_ID_SIZE];
        id.copy_from_slice(&buf[offset..end]);
        Ok(Node(id))
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Parse the canonical 32-char lowercase hex form. Wrong length,
    /// uppercase and non-hex characters are all rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != NODE_ID_SIZE * 2 {
            return Err(Error::Encoding(format!("invalid node id length {}", bytes.len())));
        }
        let mut id = [0u8; NODE_ID_SIZE];
        for (i, chunk) in bytes.chunks_exact(2).enumerate() {
            id[i] = (hex_nibble(chunk[0])? << 4) | hex_nibble(chunk[1])?;
        }
        Ok(Node(id))
    }
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 0xA),
        _ => Err(Error::Encoding(format!("invalid character in node id: {:?}", c as char))),
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
}

impl NodeType {
    pub fn to_wire(self) -> u8 {
        match self {
            NodeType::File => node_type::FILE,
            NodeType::Directory => node_type::DIRECTORY,
        }
    }

    pub fn from_wire(b: u8) -> Result<Self> {
        match b {
            node_type::FILE => Ok(NodeType::File),
            node_type::DIRECTORY => Ok(NodeType::Directory),
            _ => Err(Error::Encoding(format!("unknown node type {b}"))),
        }
    }
}

/// The 4-bit access rights set carried in node info.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rights(pub u8);

impl Rights {
    pub fn group_read(self) -> bool {
        self.0 & rights::GROUP_READ != 0
    }
    pub fn group_write(self) -> bool {
        self.0 & rights::GROUP_WRITE != 0
    }
    pub fn all_read(self) -> bool {
        self.0 & rights::ALL_READ != 0
    }
    pub fn all_write(self) -> bool {
        self.0 & rights::ALL_WRITE != 0
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |on: bool, c: char| if on { c } else { '-' };
        write!(
            f,
            "{}{}{}{}",
            bit(self.group_read(), 'r'),
            bit(self.group_write(), 'w'),
            bit(self.all_read(), 'R'),
            bit(self.all_write(), 'W'),
        )
    }
}

/// Metadata returned by get_node_info. Produced per request, never cached.
#[derive(Clone, Copy, Debug)]
pub struct NodeInfo {
    pub node_type: NodeType,
    pub rights: Rights,
    pub size: u64,
}

/// One entry yielded during a directory listing.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub node: Node,
    pub name: String,
}
