//! Minimal HTTP/1.0 GET client for polling NMEA endpoints.
//!
//! Only plain `http://` URLs are supported. The request asks the peer to
//! close the connection, so the body is everything after the headers
//! (bounded by `Content-Length` when present).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::transport::TransportError;

/// Largest response accepted, headers included.
pub const MAX_RESPONSE_LEN: usize = 8 * 1024;

/// A parsed `http://host[:port]/path` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl HttpUrl {
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(url.to_string());
        let rest = url.strip_prefix("http://").ok_or_else(invalid)?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Fetch `url` and return the response body.
///
/// The whole exchange (connect, request, response) is bounded by
/// `timeout`.
pub async fn get(url: &HttpUrl, timeout: Duration) -> Result<Vec<u8>, TransportError> {
    let exchange = async {
        let mut stream = TcpStream::connect((url.host.as_str(), url.port)).await?;
        let request = format!(
            "GET {} HTTP/1.0\r\nHost: {}\r\nAccept: text/plain\r\nConnection: close\r\n\r\n",
            url.path,
            url.host_header()
        );
        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::new();
        (&mut stream)
            .take(MAX_RESPONSE_LEN as u64 + 1)
            .read_to_end(&mut response)
            .await?;
        if response.len() > MAX_RESPONSE_LEN {
            return Err(TransportError::Http("response too large".into()));
        }
        parse_response(&response)
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TransportError::Http(format!("no response within {:?}", timeout)))?
}

/// Split a raw response into status and body; non-2xx is an error.
pub fn parse_response(raw: &[u8]) -> Result<Vec<u8>, TransportError> {
    let header_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| TransportError::Http("incomplete response headers".into()))?;
    let head = std::str::from_utf8(&raw[..header_end])
        .map_err(|_| TransportError::Http("non-text response headers".into()))?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| TransportError::Http(format!("bad status line '{}'", status_line)))?;
    if !(200..300).contains(&status) {
        return Err(TransportError::Http(format!("status {}", status)));
    }

    let content_length = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    });

    let body = &raw[header_end + 4..];
    let body = match content_length {
        Some(len) if len < body.len() => &body[..len],
        _ => body,
    };
    Ok(body.to_vec())
}
