//! End-to-end tests over real sockets.
//!
//! Each test binds a server on an ephemeral port, runs its event loop on a
//! background thread, and talks to it with plain blocking std clients.

use framecast::config::{Config, FramingType};
use framecast::runtime::Server;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

fn start_server(mut config: Config) -> SocketAddr {
    config.listen = "127.0.0.1:0".to_string();
    let mut server = Server::bind(&config).expect("bind");
    let addr = server.local_addr();
    thread::spawn(move || {
        let _ = server.run();
    });
    addr
}

fn send_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .unwrap();
    stream.write_all(payload).unwrap();
}

fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    let len = u32::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    payload
}

/// Read until EOF or error; either counts as the server closing us.
fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

#[test]
fn test_echo_and_session_reuse() {
    let addr = start_server(Config::default());
    let mut client = TcpStream::connect(addr).unwrap();

    send_frame(&mut client, b"hello");
    assert_eq!(read_frame(&mut client), b"hello");

    // The connection stays open and serves a second frame.
    send_frame(&mut client, b"again");
    assert_eq!(read_frame(&mut client), b"again");
}

#[test]
fn test_empty_payload() {
    let addr = start_server(Config::default());
    let mut client = TcpStream::connect(addr).unwrap();

    send_frame(&mut client, b"");
    assert_eq!(read_frame(&mut client), b"");
}

#[test]
fn test_pipelined_frames_echoed_in_order() {
    let addr = start_server(Config::default());
    let mut client = TcpStream::connect(addr).unwrap();

    // Both frames in a single write.
    let mut wire = Vec::new();
    for payload in [&b"first"[..], b"second"] {
        wire.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        wire.extend_from_slice(payload);
    }
    client.write_all(&wire).unwrap();

    assert_eq!(read_frame(&mut client), b"first");
    assert_eq!(read_frame(&mut client), b"second");
}

#[test]
fn test_byte_at_a_time_delivery() {
    let addr = start_server(Config::default());
    let mut client = TcpStream::connect(addr).unwrap();
    client.set_nodelay(true).unwrap();

    let payload = b"trickled";
    let mut wire = (payload.len() as u32).to_le_bytes().to_vec();
    wire.extend_from_slice(payload);
    for byte in wire {
        client.write_all(&[byte]).unwrap();
    }

    assert_eq!(read_frame(&mut client), payload);
}

#[test]
fn test_large_frame_partial_writes() {
    // Bigger than any socket buffer, forcing the server through WouldBlock
    // on write and back around the writable path.
    let addr = start_server(Config::default());
    let mut client = TcpStream::connect(addr).unwrap();

    let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| i as u8).collect();
    let reader = {
        let mut stream = client.try_clone().unwrap();
        thread::spawn(move || read_frame(&mut stream))
    };
    send_frame(&mut client, &payload);

    assert_eq!(reader.join().unwrap(), payload);
}

#[test]
fn test_oversized_declaration_closes_connection() {
    let config = Config {
        max_frame: 1024,
        ..Config::default()
    };
    let addr = start_server(config);
    let mut client = TcpStream::connect(addr).unwrap();

    // Header only; the server must reject without waiting for the payload.
    client.write_all(&2048u32.to_le_bytes()).unwrap();
    assert_closed(&mut client);
}

#[test]
fn test_oversized_closes_only_the_offender() {
    let config = Config {
        max_frame: 1024,
        ..Config::default()
    };
    let addr = start_server(config);

    let mut bystander = TcpStream::connect(addr).unwrap();
    let mut offender = TcpStream::connect(addr).unwrap();

    offender.write_all(&u32::MAX.to_le_bytes()).unwrap();
    assert_closed(&mut offender);

    // The other client's stream is unaffected.
    send_frame(&mut bystander, b"still here");
    assert_eq!(read_frame(&mut bystander), b"still here");
}

#[test]
fn test_truncated_frame_then_eof() {
    let addr = start_server(Config::default());
    let mut client = TcpStream::connect(addr).unwrap();

    // Declare 10 bytes, deliver 3, then half-close.
    client.write_all(&10u32.to_le_bytes()).unwrap();
    client.write_all(b"abc").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    assert_closed(&mut client);
}

#[test]
fn test_clean_close_with_no_partial_frame() {
    let addr = start_server(Config::default());
    let mut client = TcpStream::connect(addr).unwrap();

    send_frame(&mut client, b"bye");
    assert_eq!(read_frame(&mut client), b"bye");
    client.shutdown(Shutdown::Write).unwrap();

    assert_closed(&mut client);
}

#[test]
fn test_many_connections_all_served() {
    let addr = start_server(Config::default());

    // Connect everyone before anyone sends, so the loop is juggling all of
    // them at once.
    let mut clients: Vec<TcpStream> = (0..32).map(|_| TcpStream::connect(addr).unwrap()).collect();

    for (i, client) in clients.iter_mut().enumerate() {
        send_frame(client, format!("client-{i}").as_bytes());
    }
    for (i, client) in clients.iter_mut().enumerate() {
        assert_eq!(read_frame(client), format!("client-{i}").as_bytes());
    }
}

#[test]
fn test_connection_limit() {
    let config = Config {
        max_connections: 1,
        ..Config::default()
    };
    let addr = start_server(config);

    let mut first = TcpStream::connect(addr).unwrap();
    send_frame(&mut first, b"one");
    assert_eq!(read_frame(&mut first), b"one");

    // Second connection is accepted by the kernel but dropped by the server.
    let mut second = TcpStream::connect(addr).unwrap();
    second.write_all(&4u32.to_le_bytes()).unwrap();
    assert_closed(&mut second);

    // The first connection keeps working.
    send_frame(&mut first, b"two");
    assert_eq!(read_frame(&mut first), b"two");
}

#[test]
fn test_line_framing_mode() {
    let config = Config {
        framing: FramingType::Line,
        ..Config::default()
    };
    let addr = start_server(config);
    let mut client = TcpStream::connect(addr).unwrap();

    client.write_all(b"ping\r\npong\n").unwrap();

    let mut reader = std::io::BufReader::new(client.try_clone().unwrap());
    let mut line = String::new();
    std::io::BufRead::read_line(&mut reader, &mut line).unwrap();
    assert_eq!(line, "ping\n");
    line.clear();
    std::io::BufRead::read_line(&mut reader, &mut line).unwrap();
    assert_eq!(line, "pong\n");
}

#[test]
fn test_idle_timeout_expires_connection() {
    let config = Config {
        idle_timeout: 1,
        ..Config::default()
    };
    let addr = start_server(config);
    let mut client = TcpStream::connect(addr).unwrap();

    // Active connections survive.
    send_frame(&mut client, b"alive");
    assert_eq!(read_frame(&mut client), b"alive");

    // Then go quiet past the deadline.
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    assert_closed(&mut client);
}
