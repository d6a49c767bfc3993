#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub provider: String,
    pub model: String,
    pub chunks: Vec<Value>,
    pub expected: Expected,
}

#[derive(Debug, Deserialize)]
pub struct Expected {
    pub tokens: String,
    #[serde(default)]
    pub reasoning: String,
    pub content: String,
    pub thinking: Option<String>,
    pub usage: ExpectedUsage,
}

#[derive(Debug, Deserialize)]
pub struct ExpectedUsage {
    pub input: u64,
    pub output: u64,
}

/// A request as seen by the local test server.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("request body is json")
    }
}

pub fn fixture_path(name: &str) -> PathBuf {
    let crate_fixture_relative = PathBuf::from("crates")
        .join("promptbench-llm")
        .join("tests")
        .join("fixtures")
        .join("streams")
        .join(name);

    if let Ok(cwd) = std::env::current_dir() {
        for ancestor in cwd.ancestors() {
            let candidate = ancestor.join(&crate_fixture_relative);
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("streams")
        .join(name)
}

pub fn read_fixture(name: &str) -> Fixture {
    let data = fs::read_to_string(fixture_path(name)).expect("read fixture file");
    serde_json::from_str(&data).expect("parse fixture json")
}

pub fn sse_body(chunks: &[Value], append_done: bool) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str("data: ");
        body.push_str(&serde_json::to_string(chunk).expect("serialize chunk"));
        body.push_str("\n\n");
    }
    if append_done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

/// Serves one response and reports the request it answered.
pub fn spawn_server(
    status_line: &'static str,
    content_type: &'static str,
    body: String,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local test server");
    let address = listener.local_addr().expect("server local addr");
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            if let Some(request) = read_request(&mut socket) {
                let _ = sender.send(request);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket
                .write_all(response.as_bytes())
                .expect("write response");
            let _ = socket.flush();
        }
    });

    (format!("http://{address}"), receiver)
}

pub fn spawn_sse_server(body: String) -> (String, mpsc::Receiver<CapturedRequest>) {
    spawn_server("200 OK", "text/event-stream", body)
}

/// Writes `body` in the given pieces, flushing and pausing between them.
pub fn spawn_chunked_sse_server(pieces: Vec<Vec<u8>>, pause: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local test server");
    let address = listener.local_addr().expect("server local addr");
    thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            let _ = read_request(&mut socket);
            let head =
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).is_err() {
                return;
            }
            for piece in pieces {
                if socket.write_all(&piece).is_err() {
                    return;
                }
                let _ = socket.flush();
                thread::sleep(pause);
            }
        }
    });

    format!("http://{address}")
}

/// Sends one frame and then holds the connection open without writing.
pub fn spawn_stalling_sse_server(first: String, stall: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local test server");
    let address = listener.local_addr().expect("server local addr");
    thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            let _ = read_request(&mut socket);
            let head =
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
            let _ = socket.write_all(head.as_bytes());
            let _ = socket.write_all(first.as_bytes());
            let _ = socket.flush();
            thread::sleep(stall);
        }
    });

    format!("http://{address}")
}

/// Sends an error status promising a longer body than it writes, then stalls.
pub fn spawn_stalling_error_server(status_line: &'static str, stall: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local test server");
    let address = listener.local_addr().expect("server local addr");
    thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            let _ = read_request(&mut socket);
            let head = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n{{\"error\":"
            );
            let _ = socket.write_all(head.as_bytes());
            let _ = socket.flush();
            thread::sleep(stall);
        }
    });

    format!("http://{address}")
}

fn read_request(socket: &mut TcpStream) -> Option<CapturedRequest> {
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    let mut data = Vec::new();
    let mut buffer = [0_u8; 8192];
    let header_end = loop {
        let read = socket.read(&mut buffer).ok()?;
        if read == 0 {
            return None;
        }
        data.extend_from_slice(&buffer[..read]);
        if let Some(position) = data.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect::<Vec<_>>();
    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let read = socket.read(&mut buffer).ok()?;
        if read == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..read]);
    }
    let body = String::from_utf8_lossy(&data[header_end..]).to_string();

    Some(CapturedRequest {
        request_line,
        headers,
        body,
    })
}
