#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// What the stub endpoint does with one request.
#[derive(Clone, Debug)]
pub enum Reply {
    Json { http_status: u16, body: String },
    Stall(Duration),
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Reply::Json {
            http_status: 200,
            body: format!(r#"{{"status":{},"message":"stub","data":null}}"#, status),
        }
    }

    pub fn http(http_status: u16) -> Self {
        Reply::Json {
            http_status,
            body: r#"{"status":200}"#.to_string(),
        }
    }
}

/// Minimal HTTP endpoint answering one scripted reply per connection.
pub struct StubEndpoint {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    join: Option<JoinHandle<()>>,
}

impl StubEndpoint {
    pub fn start(script: Vec<Reply>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let join = std::thread::spawn(move || {
            for reply in script {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let Ok(request) = read_request(&mut stream) else {
                    continue;
                };
                recorded.lock().unwrap().push(request);
                match reply {
                    Reply::Json { http_status, body } => {
                        let response = format!(
                            "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            http_status,
                            body.len(),
                            body
                        );
                        let _ = stream.write_all(response.as_bytes());
                        let _ = stream.flush();
                    }
                    Reply::Stall(duration) => std::thread::sleep(duration),
                }
            }
        });
        Ok(Self {
            addr,
            requests,
            join: Some(join),
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}/functions/v1/uploadData", self.addr)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until every scripted reply has been served.
    pub fn finish(mut self) -> Result<Vec<String>> {
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("stub endpoint panicked"))?;
        }
        Ok(self.requests())
    }
}

/// An address with nothing listening on it.
pub fn closed_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

fn read_request(stream: &mut TcpStream) -> Result<String> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok());
    let chunked = headers.contains("transfer-encoding: chunked");

    loop {
        let body = &buf[header_end..];
        let complete = match content_length {
            Some(len) => body.len() >= len,
            None if chunked => find(body, b"0\r\n\r\n").is_some(),
            None => true,
        };
        if complete {
            break;
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
