//! Opening handshake: the first-phase filter and the upgrade helpers.
//!
//! ```text
//! client                                   server
//!   GET /chat HTTP/1.1                       HTTP/1.1 101 Switching Protocols
//!   Upgrade: websocket           ────►       Upgrade: websocket
//!   Connection: Upgrade                      Connection: Upgrade
//!   Sec-WebSocket-Key: <16 random bytes>     Sec-WebSocket-Accept: base64(sha1(key + GUID))
//!   Sec-WebSocket-Version: 13        ◄────
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use crate::pipeline::{FilterError, PipelineFilter, SequenceReader};
use crate::websocket::data::DataFilter;
use crate::websocket::error::WebSocketError;
use crate::websocket::filter::{Role, WebSocketContext, WebSocketOptions};
use crate::websocket::header::HttpHeader;
use crate::websocket::package::WebSocketPackage;

/// RFC 6455 GUID appended to the client key.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// An upgrade request or response that cannot be accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("upgrade requires GET, got {0}")]
    MethodNotAllowed(String),

    #[error("upgrade requires HTTP/1.1 or later, got {0}")]
    UnsupportedHttpVersion(String),

    #[error("missing or invalid {0} header")]
    MissingHeader(&'static str),

    #[error("unsupported Sec-WebSocket-Version {0:?}")]
    UnsupportedVersion(String),

    #[error("Sec-WebSocket-Key is not 16 base64-encoded bytes")]
    InvalidKey,

    #[error("expected status 101, got {0:?}")]
    NotSwitchingProtocols(Option<u16>),

    #[error("Sec-WebSocket-Accept does not match the request key")]
    AcceptMismatch,

    #[error("server selected sub-protocol {0:?} that was not offered")]
    ProtocolNotOffered(String),
}

/// Sec-WebSocket-Accept value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// A fresh random Sec-WebSocket-Key.
pub fn generate_key<R: RngCore>(rng: &mut R) -> String {
    let mut key = [0u8; 16];
    rng.fill_bytes(&mut key);
    STANDARD.encode(key)
}

/// An accepted upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Sub-protocol chosen from the client's offer, if any.
    pub protocol: Option<String>,
    /// Full response head, blank line included.
    pub text: String,
}

/// Validate an upgrade request and build the `101 Switching Protocols`
/// response. The first protocol the client offers that appears in
/// `sub_protocols` is selected.
pub fn server_response(
    header: &HttpHeader,
    sub_protocols: &[String],
) -> Result<HandshakeResponse, HandshakeError> {
    if header.method != "GET" {
        return Err(HandshakeError::MethodNotAllowed(header.method.clone()));
    }
    if matches!(header.http_version.as_str(), "HTTP/0.9" | "HTTP/1.0") {
        return Err(HandshakeError::UnsupportedHttpVersion(
            header.http_version.clone(),
        ));
    }
    if !header.has_token("upgrade", "websocket") {
        return Err(HandshakeError::MissingHeader("Upgrade"));
    }
    if !header.has_token("connection", "upgrade") {
        return Err(HandshakeError::MissingHeader("Connection"));
    }
    match header.get("sec-websocket-version") {
        Some("13") => {}
        Some(other) => return Err(HandshakeError::UnsupportedVersion(other.to_string())),
        None => return Err(HandshakeError::MissingHeader("Sec-WebSocket-Version")),
    }
    let key = header
        .get("sec-websocket-key")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
    match STANDARD.decode(key) {
        Ok(raw) if raw.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey),
    }

    let protocol = header
        .tokens("sec-websocket-protocol")
        .find(|offered| sub_protocols.iter().any(|supported| supported == offered))
        .map(str::to_string);

    let mut text = String::from(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
    );
    let _ = write!(text, "Sec-WebSocket-Accept: {}\r\n", accept_key(key));
    if let Some(protocol) = &protocol {
        let _ = write!(text, "Sec-WebSocket-Protocol: {protocol}\r\n");
    }
    text.push_str("\r\n");

    Ok(HandshakeResponse { protocol, text })
}

/// `400 Bad Request` for a rejected upgrade.
pub fn reject_response(err: &HandshakeError) -> String {
    let body = err.to_string();
    format!(
        "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nSec-WebSocket-Version: 13\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}

/// Upgrade request head for the client role.
pub fn client_request(host: &str, path: &str, key: &str, sub_protocols: &[String]) -> String {
    let mut text = String::new();
    let _ = write!(
        text,
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n"
    );
    if !sub_protocols.is_empty() {
        let _ = write!(text, "Sec-WebSocket-Protocol: {}\r\n", sub_protocols.join(", "));
    }
    text.push_str("\r\n");
    text
}

/// Check a server's response to a request sent with `key` and
/// `sub_protocols`. Returns the selected sub-protocol.
pub fn verify_response(
    header: &HttpHeader,
    key: &str,
    sub_protocols: &[String],
) -> Result<Option<String>, HandshakeError> {
    if header.status_code != Some(101) {
        return Err(HandshakeError::NotSwitchingProtocols(header.status_code));
    }
    if !header.has_token("upgrade", "websocket") {
        return Err(HandshakeError::MissingHeader("Upgrade"));
    }
    if !header.has_token("connection", "upgrade") {
        return Err(HandshakeError::MissingHeader("Connection"));
    }
    let accept = header
        .get("sec-websocket-accept")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;
    if accept != accept_key(key) {
        return Err(HandshakeError::AcceptMismatch);
    }

    match header.get("sec-websocket-protocol") {
        None => Ok(None),
        Some(selected) if sub_protocols.iter().any(|offered| offered == selected) => {
            Ok(Some(selected.to_string()))
        }
        Some(selected) => Err(HandshakeError::ProtocolNotOffered(selected.to_string())),
    }
}

/// First-phase filter: waits for a complete HTTP head, yields it as a
/// `Handshake` package and prepares the data filter that replaces it.
#[derive(Debug)]
pub struct HandshakeFilter {
    role: Role,
    options: WebSocketOptions,
    /// Bytes searched without finding the blank line.
    scanned: usize,
    next: Option<DataFilter>,
}

impl HandshakeFilter {
    pub fn new(role: Role, options: WebSocketOptions) -> Self {
        Self {
            role,
            options,
            scanned: 0,
            next: None,
        }
    }

    /// The data filter built from the parsed handshake. Yields once.
    pub fn take_next(&mut self) -> Option<DataFilter> {
        self.next.take()
    }
}

impl PipelineFilter for HandshakeFilter {
    type Package = WebSocketPackage;

    fn filter(
        &mut self,
        reader: &mut SequenceReader<'_>,
    ) -> Result<Option<WebSocketPackage>, FilterError> {
        let from = self.scanned.saturating_sub(HEAD_TERMINATOR.len() - 1);
        let Some(end) = reader.find(HEAD_TERMINATOR, from) else {
            self.scanned = reader.remaining();
            return Ok(None);
        };

        let head = reader.take(end + HEAD_TERMINATOR.len());
        let text = std::str::from_utf8(&head[..end]).map_err(|_| {
            WebSocketError::MalformedHandshake("handshake is not valid UTF-8".to_string())
        })?;
        let header = match self.role {
            Role::Server => HttpHeader::parse_request(text)?,
            Role::Client => HttpHeader::parse_response(text)?,
        };

        let header = Arc::new(header);
        let context = WebSocketContext::new(self.role, &self.options, Arc::clone(&header));
        self.next = Some(DataFilter::new(Arc::new(context)));
        self.scanned = 0;

        Ok(Some(WebSocketPackage::handshake(header)))
    }

    fn reset(&mut self) {
        self.scanned = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::opcode::OpCode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn upgrade_request(key: &str) -> HttpHeader {
        let head = format!(
            "GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Protocol: chat, superchat"
        );
        HttpHeader::parse_request(&head).unwrap()
    }

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_filter_parses_request() {
        let mut filter = HandshakeFilter::new(Role::Server, WebSocketOptions::default());
        let mut reader = SequenceReader::new(b"GET /chat HTTP/1.1\r\nHost: x\r\n\r\n");

        let package = filter.filter(&mut reader).unwrap().unwrap();
        assert_eq!(package.op_code, OpCode::Handshake);
        let header = package.header.unwrap();
        assert_eq!(header.method, "GET");
        assert_eq!(header.path, "/chat");
        assert_eq!(header.http_version, "HTTP/1.1");
        assert_eq!(header.items().collect::<Vec<_>>(), vec![("Host", "x")]);
        assert!(reader.is_empty());

        assert!(filter.take_next().is_some());
        assert!(filter.take_next().is_none());
    }

    #[test]
    fn test_filter_waits_for_blank_line_across_reads() {
        let full = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut filter = HandshakeFilter::new(Role::Server, WebSocketOptions::default());

        for split in 1..full.len() {
            let mut reader = SequenceReader::new(&full[..split]);
            assert!(filter.filter(&mut reader).unwrap().is_none());
            assert_eq!(reader.consumed(), 0);
        }
        let mut reader = SequenceReader::new(full);
        assert!(filter.filter(&mut reader).unwrap().is_some());
        assert!(filter.take_next().is_some());
    }

    #[test]
    fn test_filter_rejects_garbage() {
        let mut filter = HandshakeFilter::new(Role::Server, WebSocketOptions::default());
        let mut reader = SequenceReader::new(b"NOT-HTTP\r\n\r\n");
        assert!(filter.filter(&mut reader).is_err());
        assert!(filter.take_next().is_none());
    }

    #[test]
    fn test_client_filter_parses_status_line() {
        let mut filter = HandshakeFilter::new(Role::Client, WebSocketOptions::default());
        let mut reader =
            SequenceReader::new(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n");
        let package = filter.filter(&mut reader).unwrap().unwrap();
        assert_eq!(package.header.unwrap().status_code, Some(101));
    }

    #[test]
    fn test_server_response_selects_protocol() {
        let header = upgrade_request("dGhlIHNhbXBsZSBub25jZQ==");
        let response = server_response(&header, &["superchat".to_string()]).unwrap();

        assert_eq!(response.protocol.as_deref(), Some("superchat"));
        assert!(response.text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response
            .text
            .contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_server_response_rejections() {
        let plain = HttpHeader::parse_request("GET / HTTP/1.1\r\nHost: x").unwrap();
        assert_eq!(
            server_response(&plain, &[]),
            Err(HandshakeError::MissingHeader("Upgrade"))
        );

        let mut bad_key = upgrade_request("short");
        assert_eq!(server_response(&bad_key, &[]), Err(HandshakeError::InvalidKey));

        bad_key.method = "POST".to_string();
        assert!(matches!(
            server_response(&bad_key, &[]),
            Err(HandshakeError::MethodNotAllowed(_))
        ));

        let reject = reject_response(&HandshakeError::InvalidKey);
        assert!(reject.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[test]
    fn test_client_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let key = generate_key(&mut rng);
        assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);

        let offered = vec!["chat".to_string()];
        let request = client_request("example.com", "/ws", &key, &offered);
        let request = HttpHeader::parse_request(request.trim_end_matches("\r\n")).unwrap();
        let response = server_response(&request, &offered).unwrap();

        let response =
            HttpHeader::parse_response(response.text.trim_end_matches("\r\n")).unwrap();
        assert_eq!(
            verify_response(&response, &key, &offered),
            Ok(Some("chat".to_string()))
        );
        assert_eq!(
            verify_response(&response, "AAAAAAAAAAAAAAAAAAAAAA==", &offered),
            Err(HandshakeError::AcceptMismatch)
        );
    }
}
