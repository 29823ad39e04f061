//! Canned-response HTTP server standing in for llama-server in tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }

    pub fn path(&self) -> &str {
        self.request_line.split_whitespace().nth(1).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Json { status: u16, body: String },
    /// `text/event-stream` body written one chunk at a time.
    EventStream {
        chunks: Vec<String>,
        /// Keep the socket open after the last chunk instead of closing it.
        hold_open: bool,
    },
}

impl MockReply {
    pub fn ok_json(value: serde_json::Value) -> Self {
        MockReply::Json {
            status: 200,
            body: value.to_string(),
        }
    }

    pub fn sse(frames: &[serde_json::Value]) -> Self {
        MockReply::EventStream {
            chunks: frames
                .iter()
                .map(|frame| format!("data: {frame}\n\n"))
                .collect(),
            hold_open: false,
        }
    }
}

pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Serve `replies` in order, one per connection.
    pub async fn start(replies: Vec<MockReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should resolve");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        let task = tokio::spawn(async move {
            for reply in replies {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(request) = read_http_request(&mut stream).await else {
                    return;
                };
                captured.lock().await.push(request);
                if write_reply(&mut stream, reply).await.is_err() {
                    return;
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            task,
        }
    }

    pub async fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().await.clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_reply(stream: &mut TcpStream, reply: MockReply) -> std::io::Result<()> {
    match reply {
        MockReply::Json { status, body } => {
            let response = format!(
                "HTTP/1.1 {status} Mock\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await?;
            stream.shutdown().await
        }
        MockReply::EventStream { chunks, hold_open } => {
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await?;
            for chunk in chunks {
                stream.write_all(chunk.as_bytes()).await?;
                stream.flush().await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            if hold_open {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            stream.shutdown().await
        }
    }
}

async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let mut parts = line.splitn(2, ':');
        let Some(name) = parts.next() else {
            continue;
        };
        let value = parts.next().unwrap_or_default().trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length.saturating_sub(body.len())];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}
