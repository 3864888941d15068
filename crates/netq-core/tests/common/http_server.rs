//! Minimal HTTP/1.1 server for integration tests.
//!
//! Routes:
//! - `GET|HEAD /bytes/<n>`: `n` bytes of a repeating pattern with Content-Length.
//! - `GET /slow/<n>`: like `/bytes/<n>` but trickles the body over ~2s.
//! - `GET|HEAD /status/<code>`: empty response with that status.
//! - `GET /redirect/<rest>`: 302 to `/<rest>`.
//! - `POST /echo`: returns the request body.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// The body served for `/bytes/<n>`.
pub fn pattern(n: usize) -> Vec<u8> {
    (0u8..251).cycle().take(n).collect()
}

/// Starts a server in a background thread. Returns the base URL without a
/// trailing slash (e.g. "http://127.0.0.1:12345"). Runs until the process exits.
pub fn start() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            thread::spawn(move || handle(stream));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

struct Incoming {
    method: String,
    path: String,
    content_length: usize,
    expect_continue: bool,
    /// Body bytes that arrived with the headers.
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Option<Incoming> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = std::str::from_utf8(&buf[..header_end]).ok()?;
    let mut lines = head.lines();
    let mut first = lines.next()?.split_whitespace();
    let method = first.next()?.to_string();
    let path = first.next()?.to_string();
    let mut content_length = 0;
    let mut expect_continue = false;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("expect") {
                expect_continue = value.trim().eq_ignore_ascii_case("100-continue");
            }
        }
    }
    Some(Incoming {
        method,
        path,
        content_length,
        expect_continue,
        body: buf[header_end..].to_vec(),
    })
}

fn respond(stream: &mut TcpStream, status: &str, extra: &str, body: &[u8], send_body: bool) {
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n",
        status,
        body.len(),
        extra
    );
    let _ = stream.write_all(head.as_bytes());
    if send_body {
        let _ = stream.write_all(body);
    }
}

fn status_text(code: u16) -> String {
    let reason = match code {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    format!("{} {}", code, reason)
}

fn handle(mut stream: TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(mut req) = read_request(&mut stream) else {
        return;
    };
    let head_only = req.method.eq_ignore_ascii_case("HEAD");
    let path = req.path.trim_start_matches('/').to_string();
    let (route, arg) = path.split_once('/').unwrap_or((path.as_str(), ""));

    match (req.method.as_str(), route) {
        ("GET" | "HEAD", "bytes") => {
            let n = arg.parse().unwrap_or(0);
            respond(&mut stream, "200 OK", "", &pattern(n), !head_only);
        }
        ("GET", "slow") => {
            let n: usize = arg.parse().unwrap_or(0);
            let body = pattern(n);
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", n);
            if stream.write_all(head.as_bytes()).is_err() {
                return;
            }
            let step = (n / 20).max(1);
            for piece in body.chunks(step) {
                if stream.write_all(piece).is_err() {
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
        ("GET" | "HEAD", "status") => {
            let code = arg.parse().unwrap_or(500);
            respond(&mut stream, &status_text(code), "", b"", false);
        }
        ("GET", "redirect") => {
            let location = format!("Location: /{}\r\n", arg);
            respond(&mut stream, "302 Found", &location, b"", false);
        }
        ("POST", "echo") => {
            if req.expect_continue {
                let _ = stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n");
            }
            let mut chunk = [0u8; 4096];
            while req.body.len() < req.content_length {
                match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => req.body.extend_from_slice(&chunk[..n]),
                }
            }
            respond(&mut stream, "200 OK", "", &req.body, true);
        }
        _ => respond(&mut stream, "404 Not Found", "", b"", !head_only),
    }
}
