//! End-to-end servlet tests over loopback sockets.

use highway::{
    IpVersion, Request, Response, Server, ServerConfig, Servlet, ServletConfig, SocketConfig,
};
use std::{
    io::{Read, Write},
    net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream},
    sync::Arc,
    thread::JoinHandle,
};

fn demo_handler(req: &mut Request, resp: &mut Response) {
    match req.uri() {
        b"/hello" => {
            resp.set_status_code(200).unwrap();
            resp.set_content_length(12).unwrap();
            resp.write_body(b"Hello World!").unwrap();
        }
        b"/k" => {
            // Drain the announced body, then acknowledge.
            let mut body = [0u8; 64];
            let mut total = 0;
            loop {
                match req.recv_body(&mut body[total..]) {
                    Ok(0) => break,
                    Ok(count) => total += count,
                    Err(_) => return,
                }
            }
            assert_eq!(req.content_length(), Some(total));

            resp.set_status_code(200).unwrap();
            resp.set_content_length(0).unwrap();
        }
        b"/ignore-body" => {
            // Deliberately reads nothing.
            resp.set_status_code(200).unwrap();
            resp.set_content_length(0).unwrap();
        }
        b"/body-without-length" => {
            resp.set_status_code(200).unwrap();
            // Latches the response error state; the connection closes.
            assert!(resp.write_body(b"ok").is_err());
        }
        _ => {
            resp.set_status_code(404).unwrap();
            resp.set_content_length(0).unwrap();
        }
    }
}

fn spawn_demo() -> (SocketAddr, Arc<Server>, JoinHandle<()>) {
    let server = Server::new(ServerConfig {
        socket: SocketConfig {
            port: 0,
            ip_version: IpVersion::V4,
            bind_address: Some(Ipv4Addr::LOCALHOST),
            ..SocketConfig::default()
        },
        ..ServerConfig::default()
    });

    let servlet = Servlet::builder()
        .server(server)
        .config(ServletConfig {
            num_accept_threads: 2,
            ..ServletConfig::default()
        })
        .handler(demo_handler)
        .build()
        .unwrap();

    let server = servlet.server();
    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    let runner = std::thread::spawn(move || servlet.run().unwrap());
    (addr, server, runner)
}

/// Reads exactly one response: the header block plus `Content-Length`
/// body bytes. Returns `None` when the peer closed before sending one.
fn read_response(stream: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(at) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break at + 4;
        }
        match stream.read(&mut chunk) {
            Ok(0) => return None,
            Ok(count) => buffer.extend_from_slice(&chunk[..count]),
            Err(_) => return None,
        }
    };

    let headers = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(count) => buffer.extend_from_slice(&chunk[..count]),
            Err(_) => break,
        }
    }

    Some(String::from_utf8_lossy(&buffer[..header_end + content_length]).to_string())
}

fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest);
    rest
}

#[test]
fn get_plain_keep_alive() {
    let (addr, server, runner) = spawn_demo();
    let mut stream = TcpStream::connect(addr).unwrap();

    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n")
        .unwrap();
    let reply = read_response(&mut stream).unwrap();

    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.contains("Content-Length: 12\r\n"));
    assert!(reply.contains("Connection: keep-alive\r\n"));
    assert!(reply.ends_with("\r\n\r\nHello World!"));

    // The connection stayed open: the same socket serves another request,
    // against the same (reset) request/response pair on the server side.
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n")
        .unwrap();
    let reply = read_response(&mut stream).unwrap();
    assert!(reply.ends_with("\r\n\r\nHello World!"));

    // Release the connection before stopping, so the serving thread is
    // back in accept when the listener shuts down.
    drop(stream);
    server.stop();
    runner.join().unwrap();
}

#[test]
fn put_with_body_keeps_alive() {
    let (addr, server, runner) = spawn_demo();
    let mut stream = TcpStream::connect(addr).unwrap();

    stream
        .write_all(b"PUT /k HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
        .unwrap();
    let reply = read_response(&mut stream).unwrap();
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.contains("Content-Length: 0\r\n"));
    assert!(reply.contains("Connection: keep-alive\r\n"));

    // Body fully drained by the handler, so the connection survives.
    stream
        .write_all(b"PUT /k HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc")
        .unwrap();
    assert!(read_response(&mut stream).is_some());

    drop(stream);
    server.stop();
    runner.join().unwrap();
}

#[test]
fn under_read_body_forces_close() {
    let (addr, server, runner) = spawn_demo();
    let mut stream = TcpStream::connect(addr).unwrap();

    stream
        .write_all(b"POST /ignore-body HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789")
        .unwrap();

    // The handler ignored the 10 announced bytes: protocol violation, the
    // connection closes regardless of the advertised keep-alive, and no
    // response is sent.
    assert!(read_response(&mut stream).is_none());

    server.stop();
    runner.join().unwrap();
}

#[test]
fn unknown_http_version_closes_without_response() {
    let (addr, server, runner) = spawn_demo();
    let mut stream = TcpStream::connect(addr).unwrap();

    stream.write_all(b"GET / HTTP/2.0\r\n\r\n").unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    assert!(read_to_end(&mut stream).is_empty());

    server.stop();
    runner.join().unwrap();
}

#[test]
fn header_overflow_closes_without_response() {
    let (addr, server, runner) = spawn_demo();
    let mut stream = TcpStream::connect(addr).unwrap();

    let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
    for i in 0..33 {
        raw.extend_from_slice(format!("X-Header-{i}: v\r\n").as_bytes());
    }
    raw.extend_from_slice(b"\r\n");

    stream.write_all(&raw).unwrap();
    assert!(read_response(&mut stream).is_none());

    server.stop();
    runner.join().unwrap();
}

#[test]
fn body_without_content_length_latches_and_closes() {
    let (addr, server, runner) = spawn_demo();
    let mut stream = TcpStream::connect(addr).unwrap();

    stream
        .write_all(b"GET /body-without-length HTTP/1.1\r\n\r\n")
        .unwrap();

    // The builder latched before anything reached the wire.
    assert!(read_response(&mut stream).is_none());

    server.stop();
    runner.join().unwrap();
}

#[test]
fn connection_close_is_honored() {
    let (addr, server, runner) = spawn_demo();
    let mut stream = TcpStream::connect(addr).unwrap();

    stream
        .write_all(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let reply = read_response(&mut stream).unwrap();
    assert!(reply.contains("Connection: close\r\n"));

    // The server closed its side after the response.
    assert!(read_to_end(&mut stream).is_empty());

    server.stop();
    runner.join().unwrap();
}

#[test]
fn unknown_uri_gets_the_mapped_not_found() {
    let (addr, server, runner) = spawn_demo();
    let mut stream = TcpStream::connect(addr).unwrap();

    stream
        .write_all(b"GET /missing HTTP/1.1\r\n\r\n")
        .unwrap();
    let reply = read_response(&mut stream).unwrap();
    assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));

    drop(stream);
    server.stop();
    runner.join().unwrap();
}
