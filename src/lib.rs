//! Nimbus
//!
//! Client engine for the Cloud9 remote filesystem protocol: one persistent
//! (optionally TLS) stream per session, many concurrent requests
//! multiplexed over it by a background listener.

pub mod client;
pub mod error;
pub mod node;
pub mod ops;
pub mod path;
pub mod protocol;
pub mod tls;
pub mod transport;
pub mod wire;

pub use client::{CloudClient, Response};
pub use error::{Error, Result};
pub use node::{DirEntry, Node, NodeInfo, NodeType, Rights};
pub use ops::TransferControl;
