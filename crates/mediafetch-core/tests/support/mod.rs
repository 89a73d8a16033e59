//! Shared helpers for integration tests.
//!
//! `RawServer` is a bare HTTP/1.1 server for transfers wiremock cannot model:
//! it can cut a body short after a set number of bytes, either by closing the
//! socket or by going silent. Every connection gets one response and is then
//! closed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How a response is cut short
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum Cut {
    /// Send this many body bytes, then close the connection
    Close(usize),
    /// Send this many body bytes, then stop sending without closing
    Stall(usize),
}

pub struct RawServer {
    base: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl RawServer {
    /// Serve `content` on every path
    ///
    /// `cuts[i]` applies to the i-th connection; connections past the end of
    /// the list get the full body. With `ranges`, the server advertises
    /// `Accept-Ranges: bytes` and answers `Range: bytes=N-` with a 206.
    pub async fn start(content: Vec<u8>, ranges: bool, cuts: Vec<Option<Cut>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test server");
        let addr = listener.local_addr().expect("test server has no address");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let content = Arc::new(content);
        let log = requests.clone();
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let cut = cuts.get(index).copied().flatten();
                index += 1;
                tokio::spawn(respond(stream, content.clone(), ranges, cut, log.clone()));
            }
        });

        Self {
            base: format!("http://{}", addr),
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Request heads received so far, lowercased
    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

async fn respond(
    mut stream: TcpStream,
    content: Arc<Vec<u8>>,
    ranges: bool,
    cut: Option<Cut>,
    log: Arc<Mutex<Vec<String>>>,
) {
    let Some(head) = read_head(&mut stream).await else {
        return;
    };
    let total = content.len();
    let requested = if ranges { range_start(&head) } else { None };
    let start = requested.filter(|s| *s < total);
    log.lock().push(head);

    let body = &content[start.unwrap_or(0)..];
    let mut header = match start {
        Some(start) => format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\n",
            start,
            total - 1,
            total
        ),
        None => "HTTP/1.1 200 OK\r\n".to_string(),
    };
    header.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n", body.len()));
    if ranges {
        header.push_str("Accept-Ranges: bytes\r\n");
    }
    header.push_str("\r\n");

    if stream.write_all(header.as_bytes()).await.is_err() {
        return;
    }

    let sent = match cut {
        Some(Cut::Close(n) | Cut::Stall(n)) => n.min(body.len()),
        None => body.len(),
    };
    let _ = stream.write_all(&body[..sent]).await;
    let _ = stream.flush().await;

    match cut {
        Some(Cut::Stall(_)) => tokio::time::sleep(Duration::from_secs(60)).await,
        // Let the client read what was sent before the socket goes away
        Some(Cut::Close(_)) => tokio::time::sleep(Duration::from_millis(50)).await,
        None => {}
    }
    let _ = stream.shutdown().await;
}

async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 || buf.len() > 16 * 1024 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf).to_ascii_lowercase())
}

fn range_start(head: &str) -> Option<usize> {
    head.lines()
        .find_map(|line| line.strip_prefix("range: bytes="))?
        .trim()
        .trim_end_matches('-')
        .parse()
        .ok()
}

/// Names of the files left in `dir`; a missing directory counts as empty
#[allow(dead_code)]
pub fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}
