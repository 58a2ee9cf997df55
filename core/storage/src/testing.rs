//! Minimal HTTP/1.1 server for exercising the HTTP adapters.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Request as received by the stub.
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    /// Path and query, e.g. `/bucket/key?uploads=`.
    pub target: String,
    pub body: Vec<u8>,
}

impl StubRequest {
    pub fn has_query(&self, name: &str) -> bool {
        self.target
            .split_once('?')
            .is_some_and(|(_, query)| query.split('&').any(|pair| pair.split('=').next() == Some(name)))
    }
}

/// Canned response. Body pieces are written `pause` apart.
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub pieces: Vec<Vec<u8>>,
    pub pause: Duration,
}

impl StubResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            pieces: Vec::new(),
            pause: Duration::ZERO,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.pieces = vec![body.into()];
        self
    }

    /// Send the body in pieces with a pause before each one after the first.
    pub fn trickle(mut self, pieces: Vec<Vec<u8>>, pause: Duration) -> Self {
        self.pieces = pieces;
        self.pause = pause;
        self
    }
}

type Handler = Arc<dyn Fn(&StubRequest) -> StubResponse + Send + Sync>;

pub struct StubServer {
    pub url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubServer {
    pub async fn start(handler: impl Fn(&StubRequest) -> StubResponse + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handler: Handler = Arc::new(handler);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve(socket, handler, recorded).await;
                });
            }
        });

        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    socket: TcpStream,
    handler: Handler,
    recorded: Arc<Mutex<Vec<StubRequest>>>,
) -> std::io::Result<()> {
    let mut conn = BufReader::new(socket);
    loop {
        let mut line = String::new();
        if conn.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let mut parts = line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();

        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            conn.read_line(&mut header).await?;
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }

        let mut body = vec![0u8; content_length];
        conn.read_exact(&mut body).await?;
        let request = StubRequest {
            method,
            target,
            body,
        };
        let response = handler(&request);
        recorded.lock().unwrap().push(request);

        let length: usize = response.pieces.iter().map(Vec::len).sum();
        let mut head = format!("HTTP/1.1 {} Stub\r\ncontent-length: {}\r\n", response.status, length);
        for (name, value) in &response.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");
        conn.write_all(head.as_bytes()).await?;
        conn.flush().await?;

        for (i, piece) in response.pieces.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(response.pause).await;
            }
            conn.write_all(piece).await?;
            conn.flush().await?;
        }
    }
}
