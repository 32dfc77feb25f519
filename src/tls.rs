//! TLS transport with trust-on-first-use certificate pinning
//!
//! The server certificate's SHA-256 fingerprint is pinned in a known-hosts
//! file under the user config dir on first connect; a changed certificate
//! refuses the connection.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};

use crate::transport::{closed_err, tune_socket, Transport};

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("Nimbus");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("nimbus");
    }
    PathBuf::from(".nimbus")
}

pub fn known_hosts_path() -> PathBuf {
    config_dir().join("known_hosts")
}

fn read_known_hosts(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Ok(f) = fs::File::open(path) {
        for line in BufReader::new(f).lines().map_while(io::Result::ok) {
            if let Some((k, v)) = line.split_once('=') {
                map.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }
    map
}

fn write_known_hosts(path: &Path, map: &HashMap<String, String>) -> io::Result<()> {
    if let Some(p) = path.parent() {
        fs::create_dir_all(p)?;
    }
    // Write-then-rename so a crash cannot corrupt the pin store.
    let temp_path = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&temp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = f.metadata()?.permissions();
            perms.set_mode(0o600);
            f.set_permissions(perms)?;
        }
        writeln!(f, "# Nimbus TOFU known_hosts - format version 1")?;
        for (k, v) in map.iter() {
            writeln!(f, "{}={}", k, v)?;
        }
        f.flush()?;
        f.sync_all()?;
    }
    fs::rename(&temp_path, path)
}

fn fp_sha256_hex(cert: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(cert.as_ref());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug)]
struct TofuVerifier {
    hostport: String,
    known_path: PathBuf,
}

impl ServerCertVerifier for TofuVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _dns_name: &ServerName,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let fp = fp_sha256_hex(end_entity);
        let mut map = read_known_hosts(&self.known_path);
        match map.get(&self.hostport) {
            Some(saved) if saved == &fp => Ok(ServerCertVerified::assertion()),
            Some(_) => Err(rustls::Error::General(
                "server certificate changed; refusing connection (TOFU)".into(),
            )),
            None => {
                map.insert(self.hostport.clone(), fp);
                let _ = write_known_hosts(&self.known_path, &map);
                Ok(ServerCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}

pub fn tofu_client_config(host: &str, port: u16) -> rustls::ClientConfig {
    let verifier = TofuVerifier {
        hostport: format!("{}:{}", host, port),
        known_path: known_hosts_path(),
    };
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth()
}

fn server_name_for(host: &str) -> ServerName<'static> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        ServerName::IpAddress(ip.into())
    } else {
        ServerName::try_from(host.to_string())
            .unwrap_or_else(|_| ServerName::try_from("localhost".to_string()).unwrap())
    }
}

fn tls_err(e: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// TLS stream transport. The rustls session sits behind its own lock and is
/// only ever held briefly: the blocking socket read in `recv` happens with
/// the session lock released, so callers can keep sending while the
/// listener waits for the next response frame.
pub struct TlsTransport {
    conn: Mutex<rustls::ClientConnection>,
    sock_r: Mutex<TcpStream>,
    sock_w: Mutex<TcpStream>,
    host: String,
    port: u16,
    open: AtomicBool,
}

impl TlsTransport {
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let config = Arc::new(tofu_client_config(host, port));
        let mut sock = TcpStream::connect((host, port))?;
        tune_socket(&sock);
        let mut conn = rustls::ClientConnection::new(config, server_name_for(host))
            .map_err(tls_err)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut sock)?;
        }
        let reader = sock.try_clone()?;
        Ok(TlsTransport {
            conn: Mutex::new(conn),
            sock_r: Mutex::new(reader),
            sock_w: Mutex::new(sock),
            host: host.to_string(),
            port,
            open: AtomicBool::new(true),
        })
    }

    /// Push pending TLS records out to the socket. Call with the session
    /// lock held.
    fn write_out(&self, conn: &mut rustls::ClientConnection) -> io::Result<()> {
        while conn.wants_write() {
            let mut sock = self.sock_w.lock();
            conn.write_tls(&mut *sock)?;
        }
        Ok(())
    }
}

impl Transport for TlsTransport {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            {
                let mut conn = self.conn.lock();
                match conn.reader().read(buf) {
                    Ok(0) => return Err(closed_err()), // clean close_notify
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
            // No plaintext buffered: block for more records without the
            // session lock, then feed them in.
            let mut raw = [0u8; 16 * 1024];
            let n = self.sock_r.lock().read(&mut raw)?;
            if n == 0 {
                return Err(closed_err());
            }
            let mut fed = 0;
            while fed < n {
                let mut conn = self.conn.lock();
                let used = conn.read_tls(&mut &raw[fed..n])?;
                conn.process_new_packets().map_err(tls_err)?;
                if used == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "tls session refused record bytes",
                    ));
                }
                fed += used;
            }
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let mut conn = self.conn.lock();
        let n = conn.writer().write(buf)?;
        self.write_out(&mut conn)?;
        Ok(n)
    }

    fn flush(&self) -> io::Result<()> {
        {
            let mut conn = self.conn.lock();
            conn.writer().flush()?;
            self.write_out(&mut conn)?;
        }
        self.sock_w.lock().flush()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn reconnect(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(TlsTransport::connect(&self.host, self.port)?))
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            {
                let mut conn = self.conn.lock();
                conn.send_close_notify();
                let _ = self.write_out(&mut conn);
            }
            let _ = self.sock_w.lock().shutdown(Shutdown::Both);
        }
    }
}
