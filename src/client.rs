//! Protocol engine: one authenticated session over one transport
//!
//! A session moves Connecting -> Handshaking -> Authenticating -> Live ->
//! Closed. Construction performs the first three steps on the calling
//! thread; once live, a single background listener thread parses response
//! frames into a pending table while any number of caller threads issue
//! requests. Writes are serialized by the send lock (which also owns the
//! request-id counter); waiting for a response is per-id and parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{cmd, init_cmd, init_status, HEADER_LEN, MAX_BODY_SIZE};
use crate::transport::{recv_exact, send_exact, Transport};
use crate::wire;

/// One correlated server reply: raw status plus body bytes.
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

struct PendingTable {
    responses: HashMap<u32, Response>,
    /// Flips false exactly once, when the transport dies.
    connected: bool,
}

pub(crate) struct Shared {
    transport: Box<dyn Transport>,
    /// Serializes all physical writes; the guarded value is the request-id
    /// counter (pre-incremented, first id is 1).
    send: Mutex<u32>,
    pending: Mutex<PendingTable>,
    notifier: Condvar,
}

impl Shared {
    /// Send one request frame and block until its response arrives or the
    /// session dies.
    pub(crate) fn request(&self, command: u16, body: &[u8]) -> Result<Response> {
        let id = {
            let mut last_id = self.send.lock();
            *last_id = last_id.wrapping_add(1);
            let id = *last_id;
            let hdr = wire::request_header(id, command, body.len() as u64);
            let t = self.transport.as_ref();
            let sent = send_exact(t, &hdr)
                .and_then(|_| send_exact(t, body))
                .and_then(|_| t.flush());
            if let Err(e) = sent {
                return Err(self.lost("send", e));
            }
            id
        };
        self.wait_response(id)
    }

    fn wait_response(&self, id: u32) -> Result<Response> {
        let mut pending = self.pending.lock();
        loop {
            if let Some(resp) = pending.responses.remove(&id) {
                return Ok(resp);
            }
            if !pending.connected {
                return Err(Error::ConnectionLost);
            }
            self.notifier.wait(&mut pending);
        }
    }

    /// Mark the session dead and wake every waiter.
    fn lost(&self, what: &str, e: std::io::Error) -> Error {
        let mut pending = self.pending.lock();
        if pending.connected {
            debug!("session lost during {what}: {e}");
            pending.connected = false;
        }
        self.notifier.notify_all();
        Error::ConnectionLost
    }

    fn listener_routine(&self) {
        loop {
            let mut hdr = [0u8; wire::RESPONSE_HEADER_LEN];
            if let Err(e) = recv_exact(self.transport.as_ref(), &mut hdr) {
                self.lost("recv", e);
                return;
            }
            let (id, status, len) = wire::parse_response_header(&hdr);
            if len > MAX_BODY_SIZE {
                warn!("response {id} body of {len} bytes exceeds limit, dropping session");
                self.transport.close();
                self.lost(
                    "recv",
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "oversized body"),
                );
                return;
            }
            let mut body = vec![0u8; len as usize];
            if let Err(e) = recv_exact(self.transport.as_ref(), &mut body) {
                self.lost("recv", e);
                return;
            }
            let mut pending = self.pending.lock();
            pending.responses.insert(id, Response { status, body });
            self.notifier.notify_all();
        }
    }
}

/// A live Cloud9 session. Cheap to share behind `Arc`; all methods take
/// `&self` and may be called from any number of threads.
pub struct CloudClient {
    pub(crate) shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
    login: String,
}

impl CloudClient {
    /// Handshake, authenticate with a password, and go live. The password
    /// callback is invoked exactly once, after the handshake succeeds, so
    /// the secret is held no longer than needed.
    pub fn connect<F>(transport: Box<dyn Transport>, login: &str, password: F) -> Result<Self>
    where
        F: FnOnce() -> String,
    {
        negotiate(transport.as_ref())?;
        let mut body = Vec::with_capacity(1 + login.len() + 32);
        wire::put_str8(&mut body, login)?;
        body.extend_from_slice(password().as_bytes());
        init(transport.as_ref(), init_cmd::AUTH, &body)?;
        Ok(Self::go_live(transport, login))
    }

    /// Handshake and authenticate with a session token (`fork`'s path).
    pub fn connect_with_token(
        transport: Box<dyn Transport>,
        login: &str,
        token: &[u8],
    ) -> Result<Self> {
        negotiate(transport.as_ref())?;
        let mut body = Vec::with_capacity(1 + login.len() + token.len());
        wire::put_str8(&mut body, login)?;
        body.extend_from_slice(token);
        init(transport.as_ref(), init_cmd::TOKEN, &body)?;
        Ok(Self::go_live(transport, login))
    }

    fn go_live(transport: Box<dyn Transport>, login: &str) -> Self {
        let shared = Arc::new(Shared {
            transport,
            send: Mutex::new(0),
            pending: Mutex::new(PendingTable {
                responses: HashMap::new(),
                connected: true,
            }),
            notifier: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("cloud-listener".into())
            .spawn(move || worker.listener_routine())
            .expect("spawn listener thread");
        debug!(login, "session live");
        CloudClient {
            shared,
            listener: Mutex::new(Some(handle)),
            login: login.to_string(),
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    /// False once the transport has failed; calls fail fast from then on.
    pub fn is_live(&self) -> bool {
        self.shared.pending.lock().connected
    }

    /// Open a second, independent session to the same server: fetch a
    /// session token over this connection, reconnect the transport, and
    /// authenticate the new connection with the token. Bulk transfers run
    /// on such a session so they do not starve interactive requests.
    pub fn fork(&self) -> Result<CloudClient> {
        let token = self.get_token()?;
        let transport = self.shared.transport.reconnect()?;
        CloudClient::connect_with_token(transport, &self.login, &token)
    }

    /// Polite goodbye: empty-body request through the normal path, then
    /// close. Best-effort; the connection is being torn down regardless.
    pub fn disconnect(&self) {
        if let Err(e) = self.shared.request(cmd::GOODBYE, &[]) {
            debug!("goodbye skipped: {e}");
        }
        self.shared.transport.close();
    }

    /// Force the transport shut. Every in-flight and future call on this
    /// session fails with ConnectionLost. Last-resort cancellation.
    pub fn shutdown_transport(&self) {
        self.shared.transport.close();
    }
}

impl Drop for CloudClient {
    fn drop(&mut self) {
        self.shared.transport.close();
        if let Some(handle) = self.listener.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Exchange and validate handshake headers; the client writes first.
fn negotiate(t: &dyn Transport) -> Result<()> {
    let ours = wire::handshake_header();
    send_exact(t, &ours)?;
    t.flush()?;
    let mut theirs = [0u8; HEADER_LEN];
    recv_exact(t, &mut theirs)?;
    wire::check_handshake(&theirs)
}

/// Send one init command and check the server's verdict.
fn init(t: &dyn Transport, command: u16, body: &[u8]) -> Result<()> {
    send_exact(t, &wire::init_header(command, body.len() as u64))?;
    send_exact(t, body)?;
    t.flush()?;
    let mut status = [0u8; 2];
    recv_exact(t, &mut status)?;
    let status = u16::from_be_bytes(status);
    if status != init_status::OK {
        return Err(Error::Init { status });
    }
    Ok(())
}
