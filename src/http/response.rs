//! Status-line parsing for origin responses, outgoing response
//! serialization, and synthesized error responses.
//!
//! Grounded on the teacher's fluent `Response` builder (`src/http/response.rs`)
//! for the synthesis/send half, and on
//! `other_examples/…httproxy…build_response_bytes` for the
//! parse-an-incoming-response half, which the teacher has no counterpart
//! for (a library server never parses a response, only builds one).

use crate::errors::ProxyError;
use crate::http::message::{self, OutBody, RawMessage};
use crate::http::request::Request;
use crate::http::types::HeaderMap;
use crate::limits::Limits;
use crate::net::Connection;
use std::path::PathBuf;

/// Either an in-memory body or a byte range of a file in the cache
/// directory, streamed on send without ever being read fully into memory.
pub(crate) enum Body {
    Bytes(Vec<u8>),
    File { path: PathBuf, offset: u64, len: u64 },
}

pub(crate) struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Response {
    /// Parses `(HTTP/d.d)? \s+ (digits) \s+ (.*)` per spec.md §4.4.
    pub(crate) fn from_raw(raw: RawMessage) -> Result<Self, ProxyError> {
        let (version, status, reason) = parse_status_line(&raw.header_line)?;
        Ok(Response {
            version,
            status,
            reason,
            headers: raw.headers,
            body: Body::Bytes(raw.body),
        })
    }

    /// Builds a `Response` for a fresh cache hit without buffering its
    /// body: only the header region is read off disk, and the body is
    /// streamed straight from `path` on send (spec.md §3's "owned file
    /// handle, for large / cached bodies" representation).
    pub(crate) async fn from_cached_file(path: PathBuf, limits: &Limits) -> Result<Self, ProxyError> {
        let (raw, offset) = message::parse_cached_header(&path, limits).await?;
        let (version, status, reason) = parse_status_line(&raw.header_line)?;
        let len: u64 = raw
            .headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        Ok(Response {
            version,
            status,
            reason,
            headers: raw.headers,
            body: Body::File { path, offset, len },
        })
    }

    /// Builds a synthetic error response: `HTTP/1.1`, the given status and
    /// reason, `Content-Length` set to `len(reason)`, and `reason` as the
    /// body (spec.md §4.4).
    pub(crate) fn synthesize_error(status: u16, reason: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.set("Content-Length", reason.len().to_string());
        headers.set("Content-Type", "text/plain");
        Response {
            version: crate::http::types::Version::HTTP_11.to_string(),
            status,
            reason: reason.to_string(),
            headers,
            body: Body::Bytes(reason.as_bytes().to_vec()),
        }
    }

    fn header_line(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.reason)
    }

    /// Serializes `version SP status SP reason CRLF` plus headers and body,
    /// via the message engine.
    pub(crate) async fn send(&mut self, conn: &mut Connection, limits: &Limits) -> Result<(), ProxyError> {
        let header_line = self.header_line();
        let out_body = match &self.body {
            Body::Bytes(bytes) => OutBody::Bytes(bytes),
            Body::File { path, offset, len } => OutBody::File {
                path,
                offset: *offset,
                len: *len,
            },
        };
        message::send(conn, &header_line, &mut self.headers, out_body, limits).await
    }
}

/// Parses `version SP status SP reason`, shared by `from_raw` (an origin
/// response parsed from bytes) and `from_cached_file` (one reconstructed
/// from an on-disk cache entry's header region).
fn parse_status_line(line: &str) -> Result<(String, u16, String), ProxyError> {
    let line = line.trim();
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| ProxyError::ParseError("empty status line".into()))?
        .to_string();
    let status_tok = parts
        .next()
        .ok_or_else(|| ProxyError::ParseError("missing status code".into()))?;
    let status: u16 = status_tok
        .parse()
        .map_err(|_| ProxyError::ParseError(format!("invalid status code: {status_tok}")))?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok((version, status, reason))
}

/// Opens a fresh connection to `request.host:request.port` (default 80),
/// sends the rewritten request, and reads back exactly one response.
/// Never reuses an upstream connection (spec.md Non-goals).
pub(crate) async fn fetch(request: &Request, limits: &Limits) -> Result<Response, ProxyError> {
    let host = request
        .host
        .as_deref()
        .ok_or_else(|| ProxyError::FetchFailed("request has no host".into()))?;
    let port = request.origin_port();

    let mut conn = Connection::connect_to_host(host, port).await?;

    let header_line = request.header_line();
    let mut headers = request.headers.clone();
    let body_bytes = request.body.as_slice();
    message::send(&mut conn, &header_line, &mut headers, OutBody::Bytes(body_bytes), limits)
        .await
        .map_err(|e| ProxyError::FetchFailed(e.to_string()))?;

    let raw = message::receive(&mut conn, limits)
        .await
        .map_err(|e| ProxyError::FetchFailed(e.to_string()))?;

    Response::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_line() {
        let raw = RawMessage {
            header_line: "HTTP/1.1 200 OK".to_string(),
            headers: HeaderMap::new(),
            body: b"HELLO".to_vec(),
        };
        let resp = Response::from_raw(raw).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
    }

    #[test]
    fn synthesizes_error_with_matching_content_length() {
        let resp = Response::synthesize_error(403, "Forbidden");
        assert_eq!(resp.headers.get("Content-Length"), Some("9"));
        assert!(matches!(resp.body, Body::Bytes(ref b) if b == b"Forbidden"));
    }

    #[tokio::test]
    async fn from_cached_file_builds_a_file_backed_body_without_buffering_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        tokio::fs::write(&path, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHELLO")
            .await
            .unwrap();

        let resp = Response::from_cached_file(path, &Limits::default()).await.unwrap();
        assert_eq!(resp.status, 200);
        match resp.body {
            Body::File { offset, len, .. } => {
                assert_eq!(len, 5);
                assert_eq!(offset, "HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n".len() as u64);
            }
            Body::Bytes(_) => panic!("expected a file-backed body"),
        }
    }
}
