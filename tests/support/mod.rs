//! Minimal HTTP/1.1 file server for exercising the real client.
//!
//! Serves HEAD and ranged GET for files held in memory, accepts multipart POST
//! uploads, and records every request it sees.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStyle {
    /// 206 with only the requested suffix.
    Partial,
    /// 200 with only the requested suffix, like a bare-bones file server.
    PlainOk,
    /// 200 with the whole file regardless of Range.
    Ignore,
    /// 200 with the whole file regardless of Range, chunked so no length is given.
    IgnoreChunked,
    /// 206 chunked, carrying the requested suffix followed by junk bytes.
    PartialOverlong,
}

pub const OVERLONG_JUNK: usize = 50;

struct ServerState {
    files: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    uploads: Mutex<Vec<Vec<FormPart>>>,
    range_style: Mutex<RangeStyle>,
    stall_after: Mutex<Option<usize>>,
    pace: Mutex<Option<(usize, Duration)>>,
    hang_head: AtomicBool,
    omit_head_length: AtomicBool,
    reject_uploads: AtomicBool,
    upload_reply_delay: Mutex<Option<Duration>>,
}

pub struct TestServer {
    pub base_url: String,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            files: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            range_style: Mutex::new(RangeStyle::Partial),
            stall_after: Mutex::new(None),
            pace: Mutex::new(None),
            hang_head: AtomicBool::new(false),
            omit_head_length: AtomicBool::new(false),
            reject_uploads: AtomicBool::new(false),
            upload_reply_delay: Mutex::new(None),
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = handle(stream, state).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn put_file(&self, name: &str, data: Vec<u8>) {
        self.state.files.lock().unwrap().insert(name.to_string(), data);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_with_method(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    pub fn uploads(&self) -> Vec<Vec<FormPart>> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn set_range_style(&self, style: RangeStyle) {
        *self.state.range_style.lock().unwrap() = style;
    }

    /// GET bodies send `n` bytes and then hold the connection open without sending more.
    pub fn stall_after(&self, n: Option<usize>) {
        *self.state.stall_after.lock().unwrap() = n;
    }

    /// GET bodies are written `piece` bytes at a time with `delay` between writes.
    pub fn pace(&self, piece: usize, delay: Duration) {
        *self.state.pace.lock().unwrap() = Some((piece, delay));
    }

    pub fn hang_head(&self, hang: bool) {
        self.state.hang_head.store(hang, Ordering::SeqCst);
    }

    pub fn omit_head_length(&self) {
        self.state.omit_head_length.store(true, Ordering::SeqCst);
    }

    pub fn reject_uploads(&self) {
        self.state.reject_uploads.store(true, Ordering::SeqCst);
    }

    /// POSTs are read in full, then answered only after `delay`.
    pub fn delay_upload_reply(&self, delay: Duration) {
        *self.state.upload_reply_delay.lock().unwrap() = Some(delay);
    }
}

/// Deterministic, non-repeating-looking content of `len` bytes.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

/// A URL nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn handle(mut stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let Some((head, rest)) = read_head(&mut stream).await? else {
        return Ok(());
    };

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or("/").trim_start_matches('/').to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let body = read_body(&mut stream, &headers, rest).await?;
    let request = RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        headers,
        body,
    };
    state.requests.lock().unwrap().push(request.clone());

    match method.as_str() {
        "HEAD" => serve_head(&mut stream, &state, &path).await?,
        "GET" => serve_get(&mut stream, &state, &request).await?,
        "POST" => serve_post(&mut stream, &state, &request).await?,
        _ => write_status(&mut stream, "405 Method Not Allowed").await?,
    }
    stream.shutdown().await
}

async fn serve_head(stream: &mut TcpStream, state: &ServerState, path: &str) -> std::io::Result<()> {
    if state.hang_head.load(Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
    let len = state.files.lock().unwrap().get(path).map(Vec::len);
    let Some(len) = len else {
        return write_status(stream, "404 Not Found").await;
    };

    let mut response = String::from("HTTP/1.1 200 OK\r\nConnection: close\r\n");
    if !state.omit_head_length.load(Ordering::SeqCst) {
        response.push_str(&format!("Content-Length: {len}\r\n"));
    }
    response.push_str("\r\n");
    stream.write_all(response.as_bytes()).await
}

async fn serve_get(
    stream: &mut TcpStream,
    state: &ServerState,
    request: &RecordedRequest,
) -> std::io::Result<()> {
    let data = state.files.lock().unwrap().get(&request.path).cloned();
    let Some(data) = data else {
        return write_status(stream, "404 Not Found").await;
    };

    let requested = request
        .header("range")
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.split('-').next())
        .and_then(|start| start.parse::<usize>().ok());

    let style = *state.range_style.lock().unwrap();
    let (status, offset) = match (requested, style) {
        (Some(start), RangeStyle::Partial | RangeStyle::PartialOverlong) => {
            ("206 Partial Content", start.min(data.len()))
        }
        (Some(start), RangeStyle::PlainOk) => ("200 OK", start.min(data.len())),
        _ => ("200 OK", 0),
    };
    let body = &data[offset..];

    if matches!(style, RangeStyle::IgnoreChunked | RangeStyle::PartialOverlong) {
        let mut payload = body.to_vec();
        if style == RangeStyle::PartialOverlong {
            payload.extend(std::iter::repeat_n(0xEEu8, OVERLONG_JUNK));
        }
        let head = format!(
            "HTTP/1.1 {status}\r\nConnection: close\r\nContent-Type: application/octet-stream\r\nTransfer-Encoding: chunked\r\n\r\n"
        );
        stream.write_all(head.as_bytes()).await?;
        for chunk in payload.chunks(256) {
            stream
                .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                .await?;
            stream.write_all(chunk).await?;
            stream.write_all(b"\r\n").await?;
        }
        stream.write_all(b"0\r\n\r\n").await?;
        return stream.flush().await;
    }

    let mut head = format!(
        "HTTP/1.1 {status}\r\nConnection: close\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n",
        body.len()
    );
    if status.starts_with("206") {
        head.push_str(&format!(
            "Content-Range: bytes {offset}-{}/{}\r\n",
            data.len().saturating_sub(1),
            data.len()
        ));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;

    let stall_after = *state.stall_after.lock().unwrap();
    if let Some(n) = stall_after {
        stream.write_all(&body[..n.min(body.len())]).await?;
        stream.flush().await?;
        std::future::pending::<()>().await;
    }

    let pace = *state.pace.lock().unwrap();
    match pace {
        Some((piece, delay)) => {
            for chunk in body.chunks(piece.max(1)) {
                stream.write_all(chunk).await?;
                stream.flush().await?;
                tokio::time::sleep(delay).await;
            }
        }
        None => stream.write_all(body).await?,
    }
    stream.flush().await
}

async fn serve_post(
    stream: &mut TcpStream,
    state: &ServerState,
    request: &RecordedRequest,
) -> std::io::Result<()> {
    if state.reject_uploads.load(Ordering::SeqCst) {
        return write_status(stream, "500 Internal Server Error").await;
    }

    let boundary = request
        .header("content-type")
        .and_then(|ct| ct.split(';').map(str::trim).find_map(|p| p.strip_prefix("boundary=")))
        .map(|b| b.trim_matches('"').to_string())
        .unwrap_or_default();
    let parts = parse_multipart(&request.body, &boundary);

    let desc = parts
        .iter()
        .find(|p| p.name == "desc")
        .map(|p| String::from_utf8_lossy(&p.data).into_owned())
        .unwrap_or_default();
    let file = parts.iter().find(|p| p.name == "file_data");
    let message = format!(
        "upload success, file: {}, size: {}, desc: {desc}",
        file.and_then(|f| f.filename.clone()).unwrap_or_default(),
        file.map(|f| f.data.len()).unwrap_or(0),
    );
    state.uploads.lock().unwrap().push(parts);

    let delay = *state.upload_reply_delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{message}",
        message.len()
    );
    stream.write_all(response.as_bytes()).await
}

async fn write_status(stream: &mut TcpStream, status: &str) -> std::io::Result<()> {
    let response = format!("HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
    stream.write_all(response.as_bytes()).await
}

async fn read_head(stream: &mut TcpStream) -> std::io::Result<Option<(String, Vec<u8>)>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find(&buf, b"\r\n\r\n", 0) {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            return Ok(Some((head, buf[end + 4..].to_vec())));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn read_body(
    stream: &mut TcpStream,
    headers: &HashMap<String, String>,
    mut body: Vec<u8>,
) -> std::io::Result<Vec<u8>> {
    let mut chunk = [0u8; 4096];

    if let Some(len) = headers.get("content-length").and_then(|v| v.parse::<usize>().ok()) {
        while body.len() < len {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(len);
        return Ok(body);
    }

    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    if !chunked {
        return Ok(Vec::new());
    }

    while !body.ends_with(b"0\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Ok(decode_chunked(&body))
}

fn decode_chunked(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(line_end) = find(raw, b"\r\n", pos) {
        let size_line = String::from_utf8_lossy(&raw[pos..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or("0").trim();
        let size = usize::from_str_radix(size_hex, 16).unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        let end = (start + size).min(raw.len());
        out.extend_from_slice(&raw[start..end]);
        pos = end + 2;
    }
    out
}

fn parse_multipart(body: &[u8], boundary: &str) -> Vec<FormPart> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();

    let mut starts = Vec::new();
    let mut from = 0;
    while let Some(at) = find(body, delimiter, from) {
        starts.push(at);
        from = at + delimiter.len();
    }

    for window in starts.windows(2) {
        let mut segment = &body[window[0] + delimiter.len()..window[1]];
        segment = segment.strip_prefix(b"\r\n").unwrap_or(segment);
        segment = segment.strip_suffix(b"\r\n").unwrap_or(segment);

        let Some(split) = find(segment, b"\r\n\r\n", 0) else {
            continue;
        };
        let head = String::from_utf8_lossy(&segment[..split]).into_owned();
        let mut part = FormPart {
            data: segment[split + 4..].to_vec(),
            ..FormPart::default()
        };

        for line in head.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "content-disposition" => {
                    for param in value.split(';').map(str::trim) {
                        if let Some(v) = param.strip_prefix("name=") {
                            part.name = v.trim_matches('"').to_string();
                        } else if let Some(v) = param.strip_prefix("filename=") {
                            part.filename = Some(v.trim_matches('"').to_string());
                        }
                    }
                }
                "content-type" => part.content_type = Some(value.trim().to_string()),
                _ => {}
            }
        }
        parts.push(part);
    }
    parts
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
