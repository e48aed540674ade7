//! One-shot HTTP server used by unit tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A canned HTTP response.
pub(crate) struct Canned {
    status: &'static str,
    content_type: &'static str,
    body: String,
}

impl Canned {
    pub(crate) fn ok_json(body: &str) -> Self {
        Self {
            status: "200 OK",
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub(crate) fn event_stream(lines: &[&str]) -> Self {
        Self {
            status: "200 OK",
            content_type: "text/event-stream",
            body: lines.iter().map(|line| format!("{}\n\n", line)).collect(),
        }
    }

    pub(crate) fn error(status: &'static str, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }
}

/// Serve `responses` in order, one per connection, and return the raw
/// requests once all of them were answered.
pub(crate) async fn serve(responses: Vec<Canned>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let task = tokio::spawn(async move {
        let mut requests = Vec::new();
        for canned in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut stream).await);

            let head = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
                canned.status, canned.content_type
            );
            // The client may hang up as soon as it has what it needs.
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(canned.body.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        requests
    });

    (base_url, task)
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&raw);
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if raw.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&raw).into_owned()
}
