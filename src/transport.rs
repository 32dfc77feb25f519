//! Byte-stream transports
//!
//! A `Transport` is an exact-byte-count send/receive abstraction over one
//! stream connection. The engine reads from it on the listener thread while
//! caller threads send, so implementations take `&self` and keep reader and
//! writer state behind their own locks.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

pub trait Transport: Send + Sync {
    /// Read up to `buf.len()` bytes. Never returns 0: a closed stream is an
    /// error, not a zero-length read.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes, returning how many were accepted.
    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    /// Open a fresh, independent transport to the same endpoint with the
    /// same configuration. Used for second control/data sessions.
    fn reconnect(&self) -> io::Result<Box<dyn Transport>>;

    /// Idempotent, never fails. Unblocks any thread stuck in `recv`.
    fn close(&self);
}

/// Loop `recv` until `buf` is full, surfacing failure immediately.
pub fn recv_exact(t: &dyn Transport, buf: &mut [u8]) -> io::Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        pos += t.recv(&mut buf[pos..])?;
    }
    Ok(())
}

/// Loop `send` until all of `buf` is accepted.
pub fn send_exact(t: &dyn Transport, buf: &[u8]) -> io::Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        pos += t.send(&buf[pos..])?;
    }
    Ok(())
}

pub(crate) fn tune_socket(stream: &TcpStream) {
    // Interactive request/response traffic; don't let Nagle batch it.
    let _ = stream.set_nodelay(true);
}

pub(crate) fn closed_err() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed")
}

/// Plain TCP transport. Reader and writer halves are clones of one socket
/// so a blocked `recv` never delays a `send`.
pub struct TcpTransport {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    host: String,
    port: u16,
    open: AtomicBool,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        tune_socket(&stream);
        let reader = stream.try_clone()?;
        Ok(TcpTransport {
            reader: Mutex::new(reader),
            writer: Mutex::new(stream),
            host: host.to_string(),
            port,
            open: AtomicBool::new(true),
        })
    }
}

impl Transport for TcpTransport {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.lock().read(buf)?;
        if n == 0 {
            return Err(closed_err());
        }
        Ok(n)
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.writer.lock().write(buf)
    }

    fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn reconnect(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(TcpTransport::connect(&self.host, self.port)?))
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.writer.lock().shutdown(Shutdown::Both);
        }
    }
}

/// Decorator that coalesces small writes into one buffer. Reads pass
/// through untouched; there is no read-ahead.
pub struct BufferedTransport {
    inner: Box<dyn Transport>,
    buf: Mutex<Vec<u8>>,
    cap: usize,
}

impl BufferedTransport {
    pub fn new(inner: Box<dyn Transport>, cap: usize) -> Self {
        BufferedTransport {
            inner,
            buf: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    fn drain(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        if !buf.is_empty() {
            send_exact(self.inner.as_ref(), buf)?;
            buf.clear();
        }
        Ok(())
    }
}

impl Transport for BufferedTransport {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf)
    }

    fn send(&self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock();
        if buf.len() + data.len() > self.cap {
            self.drain(&mut buf)?;
        }
        if data.len() > self.cap {
            // Oversized write: skip the buffer entirely.
            send_exact(self.inner.as_ref(), data)?;
        } else {
            buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&self) -> io::Result<()> {
        let mut buf = self.buf.lock();
        self.drain(&mut buf)?;
        self.inner.flush()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn reconnect(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(BufferedTransport::new(self.inner.reconnect()?, self.cap)))
    }

    fn close(&self) {
        self.inner.close();
    }
}
