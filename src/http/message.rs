//! The incremental HTTP message engine: reads a header-line/headers/body
//! triple off a socket under an idle timeout, and serializes one back out.
//!
//! Grounded on the teacher's `Parser::fill_buffer` (`tokio::select! {
//! biased; read vs sleep(timeout) }` idiom in `src/http/request.rs`) for the
//! timed-read half, generalized from the teacher's fixed single-connection
//! buffer to a growable one, following
//! `other_examples/…httproxy…read_client_request`, which loops a `Vec<u8>`
//! until the header terminator is found — the shape this proxy needs since
//! a message here is read once per connection rather than reused across a
//! keep-alive loop.

use crate::errors::ProxyError;
use crate::http::types::HeaderMap;
use crate::limits::Limits;
use crate::net::Connection;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A parsed header-line/header-map/body triple, before it is interpreted as
/// a request or a response.
pub(crate) struct RawMessage {
    pub header_line: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// The body to serialize on send: either bytes already in memory, or a
/// byte range of an on-disk file (a fresh cache entry's stored body),
/// streamed without ever buffering it whole.
pub(crate) enum OutBody<'a> {
    Bytes(&'a [u8]),
    File { path: &'a Path, offset: u64, len: u64 },
}

/// Reads one complete message from `conn`.
///
/// Polls with `limits.keep_alive` before each read; a read that never
/// arrives aborts as `IdleTimeout`, a zero-byte read aborts as
/// `PeerClosed`. Once the header terminator `\r\n\r\n` is found, reads
/// continue until `Content-Length` worth of body has arrived; any further
/// bytes are a `FramingError` (this proxy never pipelines, so nothing should
/// follow one message on the wire).
pub(crate) async fn receive(conn: &mut Connection, limits: &Limits) -> Result<RawMessage, ProxyError> {
    let mut buf: Vec<u8> = Vec::with_capacity(limits.chunk);
    let mut chunk = vec![0u8; limits.chunk];

    let header_end = loop {
        let n = conn.read_chunk(&mut chunk, limits.keep_alive).await?;
        if n == 0 {
            return Err(ProxyError::PeerClosed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = memchr::memmem::find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > limits.max_header {
            return Err(ProxyError::HeaderTooLarge);
        }
    };
    if header_end > limits.max_header {
        return Err(ProxyError::HeaderTooLarge);
    }

    let (header_line, mut headers) = parse_header_region(&buf[..header_end])?;

    let body_len: u64 = match headers.get("Content-Length") {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ProxyError::ParseError(format!("invalid Content-Length: {v}")))?,
        None => 0,
    };
    if body_len > limits.max_body {
        return Err(ProxyError::BodyTooLarge);
    }
    headers.set("Content-Length", body_len.to_string());

    let total = header_end + body_len as usize;
    while buf.len() < total {
        let n = conn.read_chunk(&mut chunk, limits.keep_alive).await?;
        if n == 0 {
            return Err(ProxyError::PeerClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    if buf.len() > total {
        return Err(ProxyError::FramingError);
    }

    let body = buf[header_end..total].to_vec();
    Ok(RawMessage {
        header_line,
        headers,
        body,
    })
}

/// Parses an already-complete message buffer (used for bytes read back from
/// the cache, which are a full raw response already on disk).
pub(crate) fn parse_complete(buf: &[u8], limits: &Limits) -> Result<RawMessage, ProxyError> {
    let header_end = memchr::memmem::find(buf, b"\r\n\r\n")
        .ok_or_else(|| ProxyError::FramingError)?
        + 4;
    if header_end > limits.max_header {
        return Err(ProxyError::HeaderTooLarge);
    }
    let (header_line, headers) = parse_header_region(&buf[..header_end])?;
    let body = buf[header_end..].to_vec();
    Ok(RawMessage {
        header_line,
        headers,
        body,
    })
}

/// Reads only the header region of an on-disk cache file and returns it
/// alongside the byte offset its body starts at, so the body itself never
/// has to be loaded into memory (spec.md §3's file-handle body
/// representation, used for fresh cache hits).
pub(crate) async fn parse_cached_header(path: &Path, limits: &Limits) -> Result<(RawMessage, u64), ProxyError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ProxyError::CacheIoError(e.to_string()))?;

    let mut buf: Vec<u8> = Vec::with_capacity(limits.chunk);
    let mut chunk = vec![0u8; limits.chunk];
    let header_end = loop {
        let n = file
            .read(&mut chunk)
            .await
            .map_err(|e| ProxyError::CacheIoError(e.to_string()))?;
        if n == 0 {
            return Err(ProxyError::FramingError);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = memchr::memmem::find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > limits.max_header {
            return Err(ProxyError::HeaderTooLarge);
        }
    };

    let (header_line, headers) = parse_header_region(&buf[..header_end])?;
    Ok((
        RawMessage {
            header_line,
            headers,
            body: Vec::new(),
        },
        header_end as u64,
    ))
}

fn parse_header_region(region: &[u8]) -> Result<(String, HeaderMap), ProxyError> {
    let mut lines = region.split(|&b| b == b'\n');
    let first = lines
        .next()
        .ok_or_else(|| ProxyError::ParseError("empty header region".into()))?;
    let header_line = strip_cr(first);
    let header_line = String::from_utf8_lossy(header_line).into_owned();
    if header_line.is_empty() {
        return Err(ProxyError::ParseError("empty header line".into()));
    }

    let mut headers = HeaderMap::new();
    for raw_line in lines {
        let line = strip_cr(raw_line);
        if line.is_empty() {
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue; // malformed line, skipped silently per spec.md §4.2
        };
        let name = &line[..colon];
        if name.is_empty() {
            continue;
        }
        let mut value = &line[colon + 1..];
        while matches!(value.first(), Some(b' ') | Some(b'\t')) {
            value = &value[1..];
        }
        headers.set(
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        );
    }
    Ok((header_line, headers))
}

#[inline]
fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Serializes `header_line` + `headers` + `body`, reconciling
/// `Content-Length` with the body's actual extent before writing.
pub(crate) async fn send(
    conn: &mut Connection,
    header_line: &str,
    headers: &mut HeaderMap,
    body: OutBody<'_>,
    limits: &Limits,
) -> Result<(), ProxyError> {
    let body_len = match &body {
        OutBody::Bytes(bytes) => bytes.len() as u64,
        OutBody::File { len, .. } => *len,
    };
    headers.set("Content-Length", body_len.to_string());

    let mut out = Vec::with_capacity(header_line.len() + 256);
    out.extend_from_slice(header_line.as_bytes());
    if !header_line.ends_with("\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");

    if let OutBody::Bytes(bytes) = &body {
        out.extend_from_slice(bytes);
    }

    conn.send_all(&out, limits.keep_alive).await?;

    if let OutBody::File { path, offset, len } = body {
        if len > 0 {
            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(|e| ProxyError::CacheIoError(e.to_string()))?;
            if offset > 0 {
                file.seek(std::io::SeekFrom::Start(offset))
                    .await
                    .map_err(|e| ProxyError::CacheIoError(e.to_string()))?;
            }
            conn.send_file_range(&mut file, len, limits.keep_alive).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, peer) = listener.accept().await.unwrap();
        (client, Connection::from_accepted(server_stream, peer))
    }

    fn small_limits() -> Limits {
        let mut limits = Limits::default();
        limits.max_header = 64;
        limits.max_body = 16;
        limits.keep_alive = std::time::Duration::from_millis(200);
        limits
    }

    #[tokio::test]
    async fn header_region_over_limit_is_rejected() {
        let (mut client, mut server) = connected_pair().await;
        let limits = small_limits();

        let mut req = String::from("GET / HTTP/1.1\r\n");
        for i in 0..20 {
            req.push_str(&format!("X-Filler-{i}: padding-to-blow-the-header-budget\r\n"));
        }
        req.push_str("\r\n");
        client.write_all(req.as_bytes()).await.unwrap();

        let err = receive(&mut server, &limits).await.unwrap_err();
        assert!(matches!(err, ProxyError::HeaderTooLarge), "got {err:?}");
    }

    #[tokio::test]
    async fn body_over_limit_is_rejected_without_reading_it() {
        let (mut client, mut server) = connected_pair().await;
        let limits = small_limits();

        let req = "GET / HTTP/1.1\r\nHost: example\r\nContent-Length: 1000\r\n\r\n";
        client.write_all(req.as_bytes()).await.unwrap();

        let err = receive(&mut server, &limits).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge), "got {err:?}");
    }

    #[tokio::test]
    async fn trailing_bytes_beyond_content_length_are_a_framing_error() {
        let (mut client, mut server) = connected_pair().await;
        let limits = small_limits();

        let req = "GET / HTTP/1.1\r\nHost: example\r\nContent-Length: 2\r\n\r\nABextra-garbage";
        client.write_all(req.as_bytes()).await.unwrap();

        let err = receive(&mut server, &limits).await.unwrap_err();
        assert!(matches!(err, ProxyError::FramingError), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_content_length_defaults_to_an_empty_body() {
        let (mut client, mut server) = connected_pair().await;
        let limits = small_limits();

        let req = "GET / HTTP/1.1\r\nHost: example\r\n\r\n";
        client.write_all(req.as_bytes()).await.unwrap();

        let raw = receive(&mut server, &limits).await.unwrap();
        assert!(raw.body.is_empty());
        assert_eq!(raw.headers.get("Content-Length"), Some("0"));
    }

    #[tokio::test]
    async fn parse_cached_header_splits_header_region_from_body_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        tokio::fs::write(&path, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHELLO")
            .await
            .unwrap();

        let (raw, offset) = parse_cached_header(&path, &Limits::default()).await.unwrap();
        assert_eq!(raw.header_line, "HTTP/1.1 200 OK");
        assert_eq!(raw.headers.get("Content-Length"), Some("5"));
        assert_eq!(&tokio::fs::read(&path).await.unwrap()[offset as usize..], b"HELLO");
    }
}
