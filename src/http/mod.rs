//! # Minimal HTTP/1.1 Plumbing
//!
//! Just enough HTTP for the control plane: a request reader, canned JSON and
//! HTML responses with permissive CORS, and a one-shot POST client. Every
//! connection is `Connection: close`; each accepted socket is handled by its
//! own worker task and abandoned on error without affecting the others.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{BridgeError, Result};

/// Cap on a single request (header + body).
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// A parsed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Split the head from the body and extract what the router needs.
///
/// Returns `(method, path, content_length)`; `None` for anything that is not
/// a plausible HTTP/1.1 request head.
pub fn parse_head(head: &str) -> Option<(String, String, usize)> {
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }

    let mut content_length = 0;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
    }

    Some((method, path, content_length))
}

/// Read one request from the socket.
pub async fn read_request(stream: &mut TcpStream) -> Result<Request> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 2048];

    // Read until the blank line that ends the header block
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_REQUEST_SIZE {
            return Err(BridgeError::Http("Request too large".to_string()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(BridgeError::Http("Connection closed mid-request".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let (method, path, content_length) = parse_head(&head)
        .ok_or_else(|| BridgeError::Http("Malformed request line".to_string()))?;

    if content_length > MAX_REQUEST_SIZE {
        return Err(BridgeError::Http("Body too large".to_string()));
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Request {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Assemble a full response with permissive CORS.
pub fn response(status: u16, content_type: &str, content: &str) -> String {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Error",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        content.len(),
        content
    )
}

pub fn json_response(status: u16, content: &str) -> String {
    response(status, "application/json", content)
}

pub fn html_response(content: &str) -> String {
    response(200, "text/html", content)
}

/// `{"status":"ok","message":...}`
pub fn status_ok(message: &str) -> String {
    serde_json::json!({ "status": "ok", "message": message }).to_string()
}

/// `{"status":"error","message":...}`
pub fn status_error(message: &str) -> String {
    serde_json::json!({ "status": "error", "message": message }).to_string()
}

/// Write a response and close the socket.
pub async fn write_response(stream: &mut TcpStream, payload: &str) {
    let _ = stream.write_all(payload.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// One-shot JSON POST; returns the raw response body.
///
/// The deadline covers connect, send and receive together, so a stuck peer
/// cannot wedge the caller.
pub async fn post_json(
    host: &str,
    port: u16,
    path: &str,
    body: &str,
    deadline: Duration,
) -> Result<String> {
    let attempt = async {
        let mut stream = TcpStream::connect((host, port)).await?;

        let request = format!(
            "POST {} HTTP/1.1\r\nHost: {}:{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            path,
            host,
            port,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        Ok::<Vec<u8>, std::io::Error>(response)
    };

    let response = tokio::time::timeout(deadline, attempt)
        .await
        .map_err(|_| BridgeError::Http(format!("Request to {}:{} timed out", host, port)))?
        .map_err(|e| BridgeError::Http(format!("Request to {}:{} failed: {}", host, port, e)))?;

    let text = String::from_utf8_lossy(&response);
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    Ok(body)
}
