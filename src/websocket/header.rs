//! HTTP upgrade header parsing.

use crate::websocket::error::WebSocketError;

/// Parsed request or status line plus header fields of an upgrade exchange.
///
/// Field names are matched case-insensitively. A repeated field is joined
/// onto the first occurrence with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeader {
    pub method: String,
    pub path: String,
    pub http_version: String,
    /// Set when parsed from a status line.
    pub status_code: Option<u16>,
    pub status_description: String,
    items: Vec<(String, String)>,
}

impl HttpHeader {
    /// Parse a request head (`GET /path HTTP/1.1` and fields), without the
    /// terminating blank line.
    pub fn parse_request(head: &str) -> Result<Self, WebSocketError> {
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed(format!("invalid request line {request_line:?}")));
        };
        if !version.starts_with("HTTP/") {
            return Err(malformed(format!("invalid HTTP version {version:?}")));
        }

        let mut header = HttpHeader {
            method: method.to_string(),
            path: path.to_string(),
            http_version: version.to_string(),
            ..Default::default()
        };
        header.parse_fields(lines)?;
        Ok(header)
    }

    /// Parse a response head (`HTTP/1.1 101 Switching Protocols` and fields).
    pub fn parse_response(head: &str) -> Result<Self, WebSocketError> {
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(malformed(format!("invalid status line {status_line:?}")));
        }
        let code = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| malformed(format!("invalid status code in {status_line:?}")))?;

        let mut header = HttpHeader {
            http_version: version.to_string(),
            status_code: Some(code),
            status_description: parts.next().unwrap_or_default().trim().to_string(),
            ..Default::default()
        };
        header.parse_fields(lines)?;
        Ok(header)
    }

    fn parse_fields<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> Result<(), WebSocketError> {
        for line in lines {
            if line.is_empty() {
                continue;
            }
            // Obsolete line folding continues the previous value.
            if line.starts_with([' ', '\t']) {
                let Some((_, value)) = self.items.last_mut() else {
                    return Err(malformed("continuation line before any header field"));
                };
                let folded = line.trim();
                if !folded.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(folded);
                }
                continue;
            }

            let Some((name, value)) = line.split_once(':') else {
                return Err(malformed(format!("header line without colon {line:?}")));
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(malformed("empty header name"));
            }
            self.insert(name, value.trim());
        }
        Ok(())
    }

    /// Add a field, joining onto an existing field of the same name.
    pub fn insert(&mut self, name: &str, value: &str) {
        match self
            .items
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => self.items.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the comma-separated field `name` lists `token`
    /// (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name)
            .any(|candidate| candidate.eq_ignore_ascii_case(token))
    }

    /// The comma-separated entries of field `name`, trimmed.
    pub fn tokens<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.get(name)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Fields in arrival order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn malformed(reason: impl Into<String>) -> WebSocketError {
    WebSocketError::MalformedHandshake(reason.into())
}
