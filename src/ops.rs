//! Remote filesystem operations
//!
//! Every operation serializes a command body, issues one request through
//! the engine, checks the status, and parses the reply body. The engine
//! holds no locks while a visitor or chunk callback runs, so callbacks may
//! issue further operations on the same session (recursive walks rely on
//! this).

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::client::{CloudClient, Response};
use crate::error::{Error, Result};
use crate::node::{DirEntry, Node, NodeInfo, NodeType, Rights};
use crate::protocol::{cmd, status, TRANSFER_CHUNK};
use crate::wire::{put_str8, BodyReader};

/// Fail any non-OK status; the raw code passes through untouched.
fn check(resp: Response) -> Result<Vec<u8>> {
    if resp.status != status::OK {
        return Err(Error::Request {
            status: resp.status,
        });
    }
    Ok(resp.body)
}

impl CloudClient {
    /// Home directory of `user`; empty string means the session's own user.
    pub fn get_home(&self, user: &str) -> Result<Node> {
        let body = check(self.shared.request(cmd::GET_HOME, user.as_bytes())?)?;
        BodyReader::new(&body).node()
    }

    pub fn home(&self) -> Result<Node> {
        self.get_home("")
    }

    /// Visit each entry of a directory in server-sent order. The callback
    /// may call back into this client.
    pub fn list_directory<F>(&self, node: Node, mut visit: F) -> Result<()>
    where
        F: FnMut(Node, &str),
    {
        let body = check(self.shared.request(cmd::LIST_DIRECTORY, node.as_bytes())?)?;
        let mut rd = BodyReader::new(&body);
        while !rd.is_empty() {
            let child = rd.node()?;
            let name = rd.str8()?;
            visit(child, &name);
        }
        Ok(())
    }

    /// Collecting convenience over `list_directory`.
    pub fn read_directory(&self, node: Node) -> Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        self.list_directory(node, |node, name| {
            out.push(DirEntry {
                node,
                name: name.to_string(),
            })
        })?;
        Ok(out)
    }

    /// None for the root (an empty reply body, not an error).
    pub fn get_parent(&self, node: Node) -> Result<Option<Node>> {
        let body = check(self.shared.request(cmd::GET_PARENT, node.as_bytes())?)?;
        if body.is_empty() {
            Ok(None)
        } else {
            BodyReader::new(&body).node().map(Some)
        }
    }

    pub fn make_node(&self, parent: Node, name: &str, node_type: NodeType) -> Result<Node> {
        let mut body = Vec::with_capacity(17 + name.len() + 1);
        body.extend_from_slice(parent.as_bytes());
        put_str8(&mut body, name)?;
        body.push(node_type.to_wire());
        let body = check(self.shared.request(cmd::MAKE_NODE, &body)?)?;
        BodyReader::new(&body).node()
    }

    pub fn get_node_info(&self, node: Node) -> Result<NodeInfo> {
        let body = check(self.shared.request(cmd::GET_NODE_INFO, node.as_bytes())?)?;
        let mut rd = BodyReader::new(&body);
        let node_type = NodeType::from_wire(rd.u8()?)?;
        let rights = Rights(rd.u8()?);
        let size = rd.u64_be()?;
        Ok(NodeInfo {
            node_type,
            rights,
            size,
        })
    }

    pub fn set_node_rights(&self, node: Node, rights: Rights) -> Result<()> {
        let mut body = Vec::with_capacity(17);
        body.extend_from_slice(node.as_bytes());
        body.push(rights.0);
        check(self.shared.request(cmd::SET_NODE_RIGHTS, &body)?)?;
        Ok(())
    }

    pub fn get_node_owner(&self, node: Node) -> Result<String> {
        let body = check(self.shared.request(cmd::GET_NODE_OWNER, node.as_bytes())?)?;
        BodyReader::new(&body).rest_str()
    }

    pub fn get_node_group(&self, node: Node) -> Result<String> {
        let body = check(self.shared.request(cmd::GET_NODE_GROUP, node.as_bytes())?)?;
        BodyReader::new(&body).rest_str()
    }

    pub fn set_node_group(&self, node: Node, group: &str) -> Result<()> {
        let mut body = Vec::with_capacity(16 + group.len());
        body.extend_from_slice(node.as_bytes());
        body.extend_from_slice(group.as_bytes());
        check(self.shared.request(cmd::SET_NODE_GROUP, &body)?)?;
        Ok(())
    }

    pub fn remove_node(&self, node: Node) -> Result<()> {
        check(self.shared.request(cmd::REMOVE_NODE, node.as_bytes())?)?;
        Ok(())
    }

    /// New name, same parent. The name is the remainder of the body.
    pub fn rename_node(&self, node: Node, new_name: &str) -> Result<()> {
        let mut body = Vec::with_capacity(16 + new_name.len());
        body.extend_from_slice(node.as_bytes());
        body.extend_from_slice(new_name.as_bytes());
        check(self.shared.request(cmd::RENAME_NODE, &body)?)?;
        Ok(())
    }

    pub fn move_node(&self, node: Node, new_parent: Node) -> Result<()> {
        let mut body = Vec::with_capacity(32);
        body.extend_from_slice(node.as_bytes());
        body.extend_from_slice(new_parent.as_bytes());
        check(self.shared.request(cmd::MOVE_NODE, &body)?)?;
        Ok(())
    }

    /// Returns the node of the copy.
    pub fn copy_node(&self, node: Node, new_parent: Node) -> Result<Node> {
        let mut body = Vec::with_capacity(32);
        body.extend_from_slice(node.as_bytes());
        body.extend_from_slice(new_parent.as_bytes());
        let body = check(self.shared.request(cmd::COPY_NODE, &body)?)?;
        BodyReader::new(&body).node()
    }

    /// Open a remote descriptor; `mode` is a combination of
    /// `protocol::fd_mode` bits.
    pub fn open_fd(&self, node: Node, mode: u8) -> Result<u8> {
        let mut body = Vec::with_capacity(17);
        body.extend_from_slice(node.as_bytes());
        body.push(mode);
        let body = check(self.shared.request(cmd::FD_OPEN, &body)?)?;
        BodyReader::new(&body).u8()
    }

    pub fn close_fd(&self, fd: u8) -> Result<()> {
        check(self.shared.request(cmd::FD_CLOSE, &[fd])?)?;
        Ok(())
    }

    /// Up to `max_size` bytes from the descriptor's cursor. At end of file
    /// the server answers with the END_OF_FILE status, surfaced here as a
    /// Request error (`Error::is_end_of_file`).
    pub fn read_fd(&self, fd: u8, max_size: u64) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(9);
        body.push(fd);
        body.extend_from_slice(&max_size.to_be_bytes());
        check(self.shared.request(cmd::FD_READ, &body)?)
    }

    pub fn write_fd(&self, fd: u8, data: &[u8]) -> Result<()> {
        let mut body = Vec::with_capacity(1 + data.len());
        body.push(fd);
        body.extend_from_slice(data);
        check(self.shared.request(cmd::FD_WRITE, &body)?)?;
        Ok(())
    }

    /// Chunked download: bounded `read_fd` calls against one descriptor
    /// until `total` bytes arrived or the server signals end of file.
    /// Before each chunk the control is polled: cancel aborts with
    /// `Error::Cancelled`, suspend blocks right here with no engine lock
    /// held. Returns the byte count actually delivered to `sink`.
    pub fn long_read_fd<F>(
        &self,
        fd: u8,
        total: u64,
        ctl: &TransferControl,
        mut sink: F,
    ) -> Result<u64>
    where
        F: FnMut(&[u8]) -> std::io::Result<()>,
    {
        let mut done = 0u64;
        while done < total {
            if !ctl.checkpoint() {
                return Err(Error::Cancelled);
            }
            let want = (total - done).min(TRANSFER_CHUNK as u64);
            let data = match self.read_fd(fd, want) {
                Ok(data) => data,
                Err(e) if e.is_end_of_file() => break,
                Err(e) => return Err(e),
            };
            if data.is_empty() {
                // A zero-length OK reply would never make progress.
                break;
            }
            sink(&data)?;
            done += data.len() as u64;
        }
        Ok(done)
    }

    /// Chunked upload: `fill` loads the next chunk (at most the offered
    /// buffer) and returns how many bytes it produced; fewer than requested
    /// is fine, zero ends the transfer early. Cancel/suspend behave as in
    /// `long_read_fd`. Returns the byte count written.
    pub fn long_write_fd<F>(
        &self,
        fd: u8,
        total: u64,
        ctl: &TransferControl,
        mut fill: F,
    ) -> Result<u64>
    where
        F: FnMut(&mut [u8]) -> std::io::Result<usize>,
    {
        let mut buf = vec![0u8; TRANSFER_CHUNK.min(total as usize).max(1)];
        let mut done = 0u64;
        while done < total {
            if !ctl.checkpoint() {
                return Err(Error::Cancelled);
            }
            let want = (total - done).min(buf.len() as u64) as usize;
            let n = fill(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            self.write_fd(fd, &buf[..n])?;
            done += n as u64;
        }
        Ok(done)
    }

    pub fn group_invite(&self, user: &str) -> Result<()> {
        check(self.shared.request(cmd::GROUP_INVITE, user.as_bytes())?)?;
        Ok(())
    }

    pub fn group_kick(&self, user: &str) -> Result<()> {
        check(self.shared.request(cmd::GROUP_KICK, user.as_bytes())?)?;
        Ok(())
    }

    /// Members of the session user's group.
    pub fn group_list(&self) -> Result<Vec<String>> {
        let body = check(self.shared.request(cmd::GROUP_LIST, &[])?)?;
        let mut rd = BodyReader::new(&body);
        let mut members = Vec::new();
        while !rd.is_empty() {
            members.push(rd.str8()?);
        }
        Ok(members)
    }

    /// Session token for opening a second connection (see
    /// `CloudClient::fork`).
    pub fn get_token(&self) -> Result<Vec<u8>> {
        check(self.shared.request(cmd::GET_TOKEN, &[])?)
    }
}

/// Caller-side pause/cancel switchboard for long transfers. Cloned freely
/// behind `Arc`; a UI or signal handler flips it, the transfer loop polls
/// it at chunk boundaries.
#[derive(Default)]
pub struct TransferControl {
    state: Mutex<CtlState>,
    resumed: Condvar,
}

#[derive(Default)]
struct CtlState {
    cancelled: bool,
    suspended: bool,
}

impl TransferControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        // A suspended transfer must still observe the cancel.
        self.resumed.notify_all();
    }

    pub fn suspend(&self) {
        self.state.lock().suspended = true;
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.suspended = false;
        self.resumed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Block while suspended; true means proceed, false means cancelled.
    pub fn checkpoint(&self) -> bool {
        let mut state = self.state.lock();
        while state.suspended && !state.cancelled {
            self.resumed.wait(&mut state);
        }
        !state.cancelled
    }
}
