//! End-to-end engine tests against a scripted loopback Cloud9 server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use nimbus::protocol::{cmd, init_cmd, init_status, status, TRANSFER_CHUNK};
use nimbus::transport::{BufferedTransport, TcpTransport, Transport};
use nimbus::{path, CloudClient, Error, Node, TransferControl};

const HEADER: [u8; 8] = [0x89, 0x0D, 0x0A, 0x1A, 0xC1, 0xD9, 0x00, 0x02];

fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn client_transport(port: u16) -> Box<dyn Transport> {
    let tcp = TcpTransport::connect("127.0.0.1", port).unwrap();
    Box::new(BufferedTransport::new(Box::new(tcp), 64 * 1024))
}

fn read_buf(s: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    s.read_exact(&mut buf).unwrap();
    buf
}

fn serve_handshake(s: &mut TcpStream) {
    let theirs = read_buf(s, 8);
    assert_eq!(theirs, HEADER, "client sent a bad handshake header");
    s.write_all(&HEADER).unwrap();
}

/// Read one init command; returns (command, body).
fn read_init(s: &mut TcpStream) -> (u16, Vec<u8>) {
    let hdr = read_buf(s, 10);
    let command = u16::from_be_bytes([hdr[0], hdr[1]]);
    let len = u64::from_be_bytes(hdr[2..10].try_into().unwrap());
    (command, read_buf(s, len as usize))
}

fn write_init_status(s: &mut TcpStream, st: u16) {
    s.write_all(&st.to_be_bytes()).unwrap();
}

/// Expect AUTH with the given credentials and accept them.
fn serve_auth(s: &mut TcpStream, login: &str, password: &str) {
    let (command, body) = read_init(s);
    assert_eq!(command, init_cmd::AUTH);
    let login_len = body[0] as usize;
    assert_eq!(&body[1..1 + login_len], login.as_bytes());
    assert_eq!(&body[1 + login_len..], password.as_bytes());
    write_init_status(s, init_status::OK);
}

fn read_request(s: &mut TcpStream) -> Option<(u32, u16, Vec<u8>)> {
    let mut hdr = [0u8; 14];
    if s.read_exact(&mut hdr).is_err() {
        return None;
    }
    let id = u32::from_be_bytes(hdr[0..4].try_into().unwrap());
    let command = u16::from_be_bytes([hdr[4], hdr[5]]);
    let len = u64::from_be_bytes(hdr[6..14].try_into().unwrap());
    Some((id, command, read_buf(s, len as usize)))
}

fn write_response(s: &mut TcpStream, id: u32, st: u16, body: &[u8]) {
    let mut out = Vec::with_capacity(14 + body.len());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&st.to_be_bytes());
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    out.extend_from_slice(body);
    s.write_all(&out).unwrap();
}

enum Reply {
    Body(Vec<u8>),
    Status(u16),
}

/// Handle requests with `handler` until GOODBYE (acknowledged) or EOF.
fn serve_requests<F>(s: &mut TcpStream, mut handler: F)
where
    F: FnMut(u16, &[u8]) -> Reply,
{
    while let Some((id, command, body)) = read_request(s) {
        if command == cmd::GOODBYE {
            write_response(s, id, status::OK, &[]);
            return;
        }
        match handler(command, &body) {
            Reply::Body(b) => write_response(s, id, status::OK, &b),
            Reply::Status(st) => write_response(s, id, st, &[]),
        }
    }
}

fn node(fill: u8) -> Node {
    Node::from_bytes([fill; 16])
}

fn dir_entry(n: Node, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(n.as_bytes());
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out
}

fn node_info_body(node_type: u8, rights: u8, size: u64) -> Vec<u8> {
    let mut out = vec![node_type, rights];
    out.extend_from_slice(&size.to_be_bytes());
    out
}

#[test]
fn handshake_auth_and_goodbye() {
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        serve_requests(&mut s, |_, _| Reply::Status(status::NOT_SUPPORTED));
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    assert!(client.is_live());
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn corrupted_magic_is_handshake_error() {
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        let _ = read_buf(&mut s, 8);
        let mut bad = HEADER;
        bad[0] ^= 0xFF;
        s.write_all(&bad).unwrap();
    });

    let err = CloudClient::connect(client_transport(port), "alice", || "secret".into())
        .err()
        .expect("corrupt magic must fail");
    assert!(matches!(err, Error::Handshake("header mismatch")));
    server.join().unwrap();
}

#[test]
fn release_mismatch_is_version_error() {
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        let _ = read_buf(&mut s, 8);
        let mut bad = HEADER;
        bad[7] = 0x09;
        s.write_all(&bad).unwrap();
    });

    let err = CloudClient::connect(client_transport(port), "alice", || "secret".into())
        .err()
        .unwrap();
    assert!(matches!(err, Error::Handshake("version mismatch")));
    server.join().unwrap();
}

#[test]
fn auth_failure_carries_status() {
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        let (command, _) = read_init(&mut s);
        assert_eq!(command, init_cmd::AUTH);
        write_init_status(&mut s, init_status::AUTH_FAILED);
    });

    let err = CloudClient::connect(client_transport(port), "alice", || "wrong".into())
        .err()
        .expect("bad password must fail");
    match err {
        Error::Init { status } => assert_eq!(status, init_status::AUTH_FAILED),
        other => panic!("expected Init error, got {other:?}"),
    }
    server.join().unwrap();
}

#[test]
fn concurrent_requests_correlate_under_reordering() {
    const CALLERS: usize = 8;
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        // Collect every request before answering, then reply in reverse
        // arrival order so waiters observe reordered responses.
        let mut held = Vec::new();
        while held.len() < CALLERS {
            let (id, command, body) = read_request(&mut s).unwrap();
            assert_eq!(command, cmd::GET_NODE_OWNER);
            held.push((id, body));
        }
        for (id, body) in held.into_iter().rev() {
            let owner = format!("owner-{}", body[0]);
            write_response(&mut s, id, status::OK, owner.as_bytes());
        }
        serve_requests(&mut s, |_, _| Reply::Status(status::NOT_SUPPORTED));
    });

    let client = Arc::new(
        CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap(),
    );
    let mut workers = Vec::new();
    for i in 0..CALLERS as u8 {
        let client = Arc::clone(&client);
        workers.push(thread::spawn(move || {
            let owner = client.get_node_owner(node(i)).unwrap();
            assert_eq!(owner, format!("owner-{i}"));
        }));
    }
    for w in workers {
        w.join().unwrap();
    }
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn list_directory_yields_entries_in_server_order() {
    let (listener, port) = listen();
    let docs = node(0xAA);
    let photo = node(0xBB);
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        serve_requests(&mut s, |command, _| match command {
            c if c == cmd::LIST_DIRECTORY => {
                let mut body = dir_entry(docs, "docs");
                body.extend_from_slice(&dir_entry(photo, "photo.png"));
                Reply::Body(body)
            }
            _ => Reply::Status(status::NOT_SUPPORTED),
        });
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let mut seen = Vec::new();
    client
        .list_directory(node(1), |child, name| seen.push((child, name.to_string())))
        .unwrap();
    assert_eq!(
        seen,
        vec![(docs, "docs".to_string()), (photo, "photo.png".to_string())]
    );
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn get_parent_maps_empty_body_to_none() {
    let (listener, port) = listen();
    let root_parent = node(0x11);
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        let mut first = true;
        serve_requests(&mut s, move |command, _| {
            assert_eq!(command, cmd::GET_PARENT);
            if first {
                first = false;
                Reply::Body(Vec::new())
            } else {
                Reply::Body(root_parent.as_bytes().to_vec())
            }
        });
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    assert_eq!(client.get_parent(node(2)).unwrap(), None);
    assert_eq!(client.get_parent(node(3)).unwrap(), Some(root_parent));
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn request_error_keeps_session_usable() {
    let (listener, port) = listen();
    let home = node(0x42);
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        let mut calls = 0;
        serve_requests(&mut s, move |_, _| {
            calls += 1;
            if calls == 1 {
                Reply::Status(status::FORBIDDEN)
            } else {
                Reply::Body(home.as_bytes().to_vec())
            }
        });
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let err = client.get_home("root").unwrap_err();
    assert_eq!(err.request_status(), Some(status::FORBIDDEN));
    // The failure was local to that request; the session still works.
    assert_eq!(client.get_home("").unwrap(), home);
    client.disconnect();
    server.join().unwrap();
}

/// Serves FD_OPEN/FD_READ/FD_CLOSE for one file of `size` patterned bytes.
fn file_read_handler(size: u64) -> impl FnMut(u16, &[u8]) -> Reply {
    let mut cursor = 0u64;
    move |command, body| match command {
        c if c == cmd::GET_NODE_INFO => Reply::Body(node_info_body(1, 0, size)),
        c if c == cmd::FD_OPEN => Reply::Body(vec![7]),
        c if c == cmd::FD_CLOSE => Reply::Body(Vec::new()),
        c if c == cmd::FD_READ => {
            assert_eq!(body[0], 7);
            let want = u64::from_be_bytes(body[1..9].try_into().unwrap());
            if cursor >= size {
                return Reply::Status(status::END_OF_FILE);
            }
            let n = want.min(size - cursor);
            let chunk: Vec<u8> = (cursor..cursor + n).map(|i| i as u8).collect();
            cursor += n;
            Reply::Body(chunk)
        }
        _ => Reply::Status(status::NOT_SUPPORTED),
    }
}

#[test]
fn long_read_delivers_every_byte_in_ceil_n_over_c_chunks() {
    let size = TRANSFER_CHUNK as u64 + TRANSFER_CHUNK as u64 / 2;
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        serve_requests(&mut s, file_read_handler(size));
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let fd = client.open_fd(node(9), nimbus::protocol::fd_mode::READ).unwrap();
    let ctl = TransferControl::new();
    let mut chunks = 0usize;
    let mut total = 0u64;
    let copied = client
        .long_read_fd(fd, size, &ctl, |chunk| {
            chunks += 1;
            total += chunk.len() as u64;
            Ok(())
        })
        .unwrap();
    assert_eq!(copied, size);
    assert_eq!(total, size);
    assert_eq!(chunks, 2); // ceil(1.5 * chunk / chunk)
    client.close_fd(fd).unwrap();
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn long_read_stops_at_server_end_of_file() {
    // Declared size is larger than what the server actually has.
    let actual = 400u64;
    let declared = 1000u64;
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        serve_requests(&mut s, file_read_handler(actual));
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let fd = client.open_fd(node(9), nimbus::protocol::fd_mode::READ).unwrap();
    let ctl = TransferControl::new();
    let copied = client.long_read_fd(fd, declared, &ctl, |_| Ok(())).unwrap();
    assert_eq!(copied, actual);
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn cancel_stops_transfer_at_chunk_boundary() {
    let size = 4 * TRANSFER_CHUNK as u64;
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        serve_requests(&mut s, file_read_handler(size));
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let fd = client.open_fd(node(9), nimbus::protocol::fd_mode::READ).unwrap();
    let ctl = TransferControl::new();
    let ctl_in_sink = Arc::clone(&ctl);
    let mut chunks = 0usize;
    let err = client
        .long_read_fd(fd, size, &ctl, |_| {
            chunks += 1;
            ctl_in_sink.cancel();
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(chunks, 1);
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn long_write_pushes_every_byte() {
    let size = TRANSFER_CHUNK as u64 + 1234;
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        let mut received = 0u64;
        serve_requests(&mut s, move |command, body| match command {
            c if c == cmd::FD_OPEN => Reply::Body(vec![3]),
            c if c == cmd::FD_WRITE => {
                assert_eq!(body[0], 3);
                received += (body.len() - 1) as u64;
                Reply::Body(Vec::new())
            }
            c if c == cmd::FD_CLOSE => {
                assert_eq!(received, TRANSFER_CHUNK as u64 + 1234);
                Reply::Body(Vec::new())
            }
            _ => Reply::Status(status::NOT_SUPPORTED),
        });
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let fd = client.open_fd(node(4), nimbus::protocol::fd_mode::WRITE).unwrap();
    let ctl = TransferControl::new();
    let mut sent = 0u64;
    let copied = client
        .long_write_fd(fd, size, &ctl, |buf| {
            for b in buf.iter_mut() {
                *b = 0x5A;
            }
            sent += buf.len() as u64;
            Ok(buf.len())
        })
        .unwrap();
    assert_eq!(copied, size);
    assert_eq!(sent, size);
    client.close_fd(fd).unwrap();
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn listener_death_unblocks_waiters_and_fails_fast() {
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        // Swallow one request header and drop the connection mid-reply.
        let _ = read_request(&mut s);
        drop(s);
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let err = client.get_home("").unwrap_err();
    assert!(matches!(err, Error::ConnectionLost));
    assert!(!client.is_live());
    // Later calls must fail fast too, not block.
    let err = client.get_home("").unwrap_err();
    assert!(matches!(err, Error::ConnectionLost));
    server.join().unwrap();
}

#[test]
fn path_resolution_walks_segments() {
    let (listener, port) = listen();
    let home = node(0x01);
    let docs = node(0x02);
    let file = node(0x03);
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        serve_requests(&mut s, move |command, body| match command {
            c if c == cmd::GET_HOME => Reply::Body(home.as_bytes().to_vec()),
            c if c == cmd::LIST_DIRECTORY => {
                let dir = Node::from_slice(body, 0).unwrap();
                if dir == home {
                    let mut b = dir_entry(node(0x7F), "other");
                    b.extend_from_slice(&dir_entry(docs, "docs"));
                    Reply::Body(b)
                } else if dir == docs {
                    Reply::Body(dir_entry(file, "a.txt"))
                } else {
                    Reply::Status(status::NOT_A_DIRECTORY)
                }
            }
            _ => Reply::Status(status::NOT_SUPPORTED),
        });
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    // Repeated slashes are skipped.
    let found = path::resolve(&client, "~//docs/a.txt").unwrap();
    assert_eq!(found, file);

    let err = path::resolve(&client, "~/docs/missing.txt").unwrap_err();
    match err {
        Error::PathNotFound(segment) => assert_eq!(segment, "missing.txt"),
        other => panic!("expected PathNotFound, got {other:?}"),
    }

    let explicit = path::resolve(&client, &format!("#{docs}/a.txt")).unwrap();
    assert_eq!(explicit, file);
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn fork_opens_second_session_with_token() {
    let (listener, port) = listen();
    let token: &[u8] = b"tok-123456";
    let home = node(0x55);
    let server = thread::spawn(move || {
        // Control session.
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        let control = thread::spawn(move || {
            serve_requests(&mut s, move |command, _| match command {
                c if c == cmd::GET_TOKEN => Reply::Body(token.to_vec()),
                _ => Reply::Status(status::NOT_SUPPORTED),
            });
        });
        // Data session arrives while the control session is still live.
        let (mut s2, _) = listener.accept().unwrap();
        serve_handshake(&mut s2);
        let (command, body) = read_init(&mut s2);
        assert_eq!(command, init_cmd::TOKEN);
        let login_len = body[0] as usize;
        assert_eq!(&body[1..1 + login_len], b"alice");
        assert_eq!(&body[1 + login_len..], token);
        write_init_status(&mut s2, init_status::OK);
        serve_requests(&mut s2, move |command, _| match command {
            c if c == cmd::GET_HOME => Reply::Body(home.as_bytes().to_vec()),
            _ => Reply::Status(status::NOT_SUPPORTED),
        });
        control.join().unwrap();
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let data = client.fork().unwrap();
    assert_eq!(data.login(), "alice");
    assert_eq!(data.home().unwrap(), home);
    data.disconnect();
    client.disconnect();
    server.join().unwrap();
}

#[test]
fn node_max_size_read_request_bodies() {
    // read_fd encodes fd + u64 BE max size; verify exact body layout at the
    // server end.
    let (listener, port) = listen();
    let server = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        serve_handshake(&mut s);
        serve_auth(&mut s, "alice", "secret");
        serve_requests(&mut s, |command, body| match command {
            c if c == cmd::FD_OPEN => {
                assert_eq!(body.len(), 17);
                assert_eq!(body[16], nimbus::protocol::fd_mode::READ);
                Reply::Body(vec![1])
            }
            c if c == cmd::FD_READ => {
                assert_eq!(body.len(), 9);
                assert_eq!(body[0], 1);
                let want = u64::from_be_bytes(body[1..9].try_into().unwrap());
                assert_eq!(want, 512);
                Reply::Body(vec![0xEE; 512])
            }
            _ => Reply::Status(status::NOT_SUPPORTED),
        });
    });

    let client = CloudClient::connect(client_transport(port), "alice", || "secret".into()).unwrap();
    let fd = client.open_fd(node(8), nimbus::protocol::fd_mode::READ).unwrap();
    let data = client.read_fd(fd, 512).unwrap();
    assert_eq!(data.len(), 512);
    client.disconnect();
    server.join().unwrap();
}
