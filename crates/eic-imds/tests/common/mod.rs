// ABOUTME: In-process HTTP stub of the instance metadata service for client tests.
// ABOUTME: Serves canned replies per (method, path) and records every request it sees.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Canned reply for one route.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond with the status code and body.
    Respond(u16, String),
    /// Accept the connection and stay silent for the duration.
    Hang(Duration),
}

/// One request as the stub saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Metadata service stub bound to an ephemeral localhost port.
pub struct StubImds {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubImds {
    /// Start serving. Routes are keyed by method and full request path
    /// (including the `/latest/` prefix). Unknown routes answer 404.
    pub fn start(routes: Vec<(&str, &str, Reply)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("should bind stub listener");
        let addr = listener.local_addr().expect("should have local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes: Arc<HashMap<(String, String), Reply>> = Arc::new(
            routes
                .into_iter()
                .map(|(m, p, r)| ((m.to_string(), p.to_string()), r))
                .collect(),
        );

        let recorded = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let routes = Arc::clone(&routes);
                let recorded = Arc::clone(&recorded);
                thread::spawn(move || handle(stream, &routes, &recorded));
            }
        });

        Self { addr, requests }
    }

    /// Endpoint to put in `ImdsConfig::endpoint`.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("requests lock").clone()
    }
}

fn handle(
    mut stream: TcpStream,
    routes: &HashMap<(String, String), Reply>,
    recorded: &Mutex<Vec<Recorded>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    recorded.lock().expect("requests lock").push(Recorded {
        method: method.clone(),
        path: path.clone(),
        headers,
    });

    let reply = routes
        .get(&(method.clone(), path))
        .cloned()
        .unwrap_or_else(|| Reply::Respond(404, "Not Found".to_string()));

    match reply {
        Reply::Hang(duration) => thread::sleep(duration),
        Reply::Respond(status, body) => {
            let reason = match status {
                200 => "OK",
                404 => "Not Found",
                _ => "Error",
            };
            let mut response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            if method != "HEAD" {
                response.push_str(&body);
            }
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
    }
}
