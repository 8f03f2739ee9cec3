//! One-shot HTTP server for exercising client code against canned responses.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct StubResponse {
    pub content_type: &'static str,
    pub body: String,
}

impl StubResponse {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            content_type: "application/json",
            body: body.into(),
        }
    }

    /// An event-stream body built from `data:` payload lines.
    pub fn sse(payloads: &[&str]) -> Self {
        Self {
            content_type: "text/event-stream",
            body: payloads
                .iter()
                .map(|p| format!("data: {}\n\n", p))
                .collect(),
        }
    }
}

/// Serve `responses` to consecutive connections, in order, then stop.
/// Returns the base URL to point a client at.
pub async fn serve(responses: Vec<StubResponse>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            read_request(&mut sock).await;
            let payload = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response.content_type,
                response.body.len(),
                response.body
            );
            let _ = sock.write_all(payload.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });

    base
}

/// Drain one full request (headers plus Content-Length body) so the client
/// never sees its write side closed mid-upload.
async fn read_request(sock: &mut TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 16384];
    loop {
        let n = match sock.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        if let Some(end) = find(&data, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&data[..end]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let lower = line.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + content_length {
                return;
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
