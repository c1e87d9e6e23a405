// HTTP request-head parsing and the RFC 6455 opening handshake

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use base64::Engine;
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Longest request head accepted before the connection is dropped.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("request head exceeds {} bytes", MAX_HEAD_SIZE)]
    HeadTooLarge,

    #[error("malformed request line")]
    BadRequestLine,

    #[error("malformed header line")]
    BadHeader,
}

#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// True when the client asks to switch to the WebSocket protocol.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.headers
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }

    pub fn websocket_key(&self) -> Option<&str> {
        self.headers
            .get(header::SEC_WEBSOCKET_KEY)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Parse an HTTP/1.1 request head from the front of `buf`.
///
/// Returns `None` until the terminating blank line has arrived; on success
/// also returns the length of the head so trailing bytes can be kept.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, HandshakeError> {
    let Some(end) = find_head_end(buf) else {
        if buf.len() > MAX_HEAD_SIZE {
            return Err(HandshakeError::HeadTooLarge);
        }
        return Ok(None);
    };

    let text = std::str::from_utf8(&buf[..end]).map_err(|_| HandshakeError::BadRequestLine)?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or(HandshakeError::BadRequestLine)?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(HandshakeError::BadRequestLine);
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HandshakeError::BadRequestLine);
    }
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| HandshakeError::BadRequestLine)?;
    let uri: Uri = target.parse().map_err(|_| HandshakeError::BadRequestLine)?;

    let mut headers = HeaderMap::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or(HandshakeError::BadHeader)?;
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| HandshakeError::BadHeader)?;
        let value = HeaderValue::from_str(value.trim()).map_err(|_| HandshakeError::BadHeader)?;
        headers.append(name, value);
    }

    Ok(Some((RequestHead { method, uri, headers }, end + 4)))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

pub fn switching_protocols(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

/// A bare status line with no headers or body, used before the upgrade.
pub fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

/// A complete plain-HTTP response that closes the connection.
pub fn http_response(status: StatusCode, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        content_type,
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Vec<u8> {
    http_response(status, "application/json", body.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE_REQUEST: &[u8] = b"GET /ws?api_key=k HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_rfc_accept_key() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_parse_upgrade_request() {
        let mut bytes = UPGRADE_REQUEST.to_vec();
        bytes.extend_from_slice(&[0x81, 0x80]);

        let (head, len) = parse_request_head(&bytes).unwrap().unwrap();
        assert_eq!(len, UPGRADE_REQUEST.len());
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.path(), "/ws");
        assert_eq!(head.uri.query(), Some("api_key=k"));
        assert!(head.is_websocket_upgrade());
        assert_eq!(head.websocket_key(), Some("dGhlIHNhbXBsZSBub25jZQ=="));
    }

    #[test]
    fn test_partial_head_waits() {
        assert!(parse_request_head(&UPGRADE_REQUEST[..20]).unwrap().is_none());
    }

    #[test]
    fn test_oversized_head_rejected() {
        let junk = vec![b'a'; MAX_HEAD_SIZE + 1];
        assert!(matches!(parse_request_head(&junk), Err(HandshakeError::HeadTooLarge)));
    }

    #[test]
    fn test_malformed_heads() {
        assert!(parse_request_head(b"GARBAGE\r\n\r\n").is_err());
        assert!(parse_request_head(b"GET / HTTP/1.1\r\nno-colon\r\n\r\n").is_err());
    }

    #[test]
    fn test_plain_request_is_not_upgrade() {
        let (head, _) = parse_request_head(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap()
            .unwrap();
        assert!(!head.is_websocket_upgrade());
        assert!(head.websocket_key().is_none());
    }

    #[test]
    fn test_response_builders() {
        assert_eq!(status_line(StatusCode::UNAUTHORIZED), "HTTP/1.1 401 Unauthorized\r\n\r\n");

        let response = switching_protocols("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));

        let body = http_response(StatusCode::UPGRADE_REQUIRED, "text/plain", b"Upgrade Required");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(text.contains("Content-Length: 16\r\n"));
        assert!(text.ends_with("\r\n\r\nUpgrade Required"));
    }
}
