//! Per-connection orchestrator: receive, parse, blocklist, cache/fetch,
//! respond, error mapping.
//!
//! Grounded on the teacher's `HttpConnection::run` request-loop shape
//! (reset -> fill_buffer-with-timeout -> parse -> handle -> write) in
//! `src/server/connection.rs`, collapsed to a single pass per connection
//! since this proxy forces `Connection: close` upstream and never reuses a
//! client connection for a second request either.

use crate::blocklist::Blocklist;
use crate::cache::{Cache, CacheRead, Hit};
use crate::errors::{Disposition, ProxyError};
use crate::http::message::{self, RawMessage};
use crate::http::request::Request;
use crate::http::response::{self, Response};
use crate::limits::Limits;
use crate::net::Connection;
use std::sync::Arc;

/// The proxy identifier written into the `Via` header (spec.md §4.3).
pub(crate) const PROXY_IDENT: &str = "proxycache";

/// Shared, read-only state every worker task holds a clone of.
pub(crate) struct Shared {
    pub blocklist: Arc<Blocklist>,
    pub cache: Arc<Cache>,
    pub limits: Limits,
}

/// Drives one accepted connection end to end. Never propagates an error to
/// the caller: every failure path either writes a synthesized response or
/// closes silently, per spec.md §7.
pub(crate) async fn serve(mut conn: Connection, shared: Arc<Shared>) {
    let client_ip = conn.peer.clone();
    let span = tracing::info_span!("request", client = %client_ip);
    let _enter = span.enter();

    let raw = match message::receive(&mut conn, &shared.limits).await {
        Ok(raw) => raw,
        Err(ProxyError::IdleTimeout) | Err(ProxyError::PeerClosed) => {
            tracing::debug!("connection closed before a complete request arrived");
            return;
        }
        Err(err) => {
            respond_error(&mut conn, &shared.limits, &err).await;
            return;
        }
    };

    if let Err(err) = handle_request(&mut conn, raw, &client_ip, &shared).await {
        respond_error(&mut conn, &shared.limits, &err).await;
    }
}

async fn handle_request(
    conn: &mut Connection,
    raw: RawMessage,
    client_ip: &str,
    shared: &Shared,
) -> Result<(), ProxyError> {
    let mut request = Request::from_raw(raw)?;

    let Some(host) = request.host.clone() else {
        return Err(ProxyError::ParseError("request has no resolvable host".into()));
    };

    if shared.blocklist.is_blocked(&host).await {
        tracing::warn!(host = %host, "rejecting request to blocked host");
        return Err(ProxyError::BlockedHost);
    }

    request.rewrite_for_upstream(client_ip, PROXY_IDENT);
    let key = request.cache_key(&shared.limits);

    let (mut response, cache_read) = if key.is_empty() {
        tracing::debug!(host = %host, path = %request.path, "bypassing cache for non-cacheable request");
        (response::fetch(&request, &shared.limits).await?, None)
    } else {
        load_cached_response(shared, &key, &request).await?
    };

    tracing::info!(
        host = %host,
        path = %request.path,
        status = response.status,
        cached = !key.is_empty(),
        "request served"
    );

    let result = response.send(conn, &shared.limits).await;
    if let Some(read) = cache_read {
        shared.cache.release_read(read).await;
    }
    result
}

/// Resolves a cacheable request through `Cache::get`. A cache miss returns
/// the resolver's bytes already in memory; a fresh hit streams the body
/// straight from disk (`Response::from_cached_file`) and hands back the
/// `CacheRead` claim the caller must release once done reading it.
async fn load_cached_response(
    shared: &Shared,
    key: &str,
    request: &Request,
) -> Result<(Response, Option<CacheRead>), ProxyError> {
    let limits = shared.limits.clone();
    let hit = shared
        .cache
        .get(key, || async {
            tracing::debug!(key = %key, "resolving cache miss from origin");
            origin_fetch_bytes(request, &limits).await
        })
        .await?;

    match hit {
        Hit::Resolved(bytes) => {
            let raw = message::parse_complete(&bytes, &shared.limits)?;
            Ok((Response::from_raw(raw)?, None))
        }
        Hit::Cached { path, read } => match Response::from_cached_file(path, &shared.limits).await {
            Ok(resp) => Ok((resp, Some(read))),
            Err(err) => {
                shared.cache.release_read(read).await;
                Err(err.into_fetch_failed())
            }
        },
    }
}

/// Resolver passed to `Cache::get`: fetches from origin and returns the raw
/// response bytes (header line + headers + body) verbatim, for `cache_set`
/// to persist. Mirrors the teacher's `origin_fetch` concept named in
/// spec.md §4.6.
async fn origin_fetch_bytes(request: &Request, limits: &Limits) -> Result<Vec<u8>, ProxyError> {
    let host = request
        .host
        .as_deref()
        .ok_or_else(|| ProxyError::FetchFailed("request has no host".into()))?;
    let port = request.origin_port();

    let mut origin = Connection::connect_to_host(host, port).await?;

    let header_line = request.header_line();
    let mut headers = request.headers.clone();
    message::send(
        &mut origin,
        &header_line,
        &mut headers,
        message::OutBody::Bytes(&request.body),
        limits,
    )
    .await
    .map_err(|e| ProxyError::FetchFailed(e.to_string()))?;

    let raw = message::receive(&mut origin, limits)
        .await
        .map_err(|e| ProxyError::FetchFailed(e.to_string()))?;

    Ok(serialize_raw(&raw))
}

/// Reassembles a `RawMessage` back into the exact byte layout `cache_set`
/// persists on disk: header line, headers, blank line, body.
fn serialize_raw(raw: &RawMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.header_line.len() + raw.body.len() + 256);
    out.extend_from_slice(raw.header_line.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (name, value) in raw.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&raw.body);
    out
}

/// Surfaces an error as the synthesized response spec.md §7 maps it to, or
/// closes silently for the dispositions that call for it.
async fn respond_error(conn: &mut Connection, limits: &Limits, err: &ProxyError) {
    match err.disposition() {
        Disposition::CloseSilently => {
            tracing::debug!(error = %err, "closing connection without a response");
        }
        Disposition::Respond(status, reason) => {
            tracing::warn!(error = %err, status, "sending error response");
            let mut resp = Response::synthesize_error(status, reason);
            let _ = resp.send(conn, limits).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type CapturedRequests = Arc<tokio::sync::Mutex<Vec<Vec<u8>>>>;

    async fn mock_origin(
        expect_requests: usize,
        body: &'static [u8],
    ) -> (u16, CapturedRequests, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let captured: CapturedRequests = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        let handle = tokio::spawn(async move {
            for _ in 0..expect_requests {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = vec![0u8; 4096];
                let mut total = 0;
                loop {
                    let n = stream.read(&mut buf[total..]).await.unwrap();
                    total += n;
                    if memchr::memmem::find(&buf[..total], b"\r\n\r\n").is_some() {
                        break;
                    }
                }
                captured_clone.lock().await.push(buf[..total].to_vec());
                let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.write_all(body).await.unwrap();
            }
        });
        (port, captured, handle)
    }

    async fn shared_with(blocked: &[Ipv4Addr]) -> (Arc<Shared>, tempfile::TempDir) {
        shared_with_limits(blocked, Limits::default()).await
    }

    async fn shared_with_limits(blocked: &[Ipv4Addr], limits: Limits) -> (Arc<Shared>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf(), Duration::from_secs(60), &limits)
            .await
            .unwrap();
        let blocklist = Blocklist::from_addresses(blocked.iter().copied().collect());
        let shared = Arc::new(Shared {
            blocklist: Arc::new(blocklist),
            cache: Arc::new(cache),
            limits,
        });
        (shared, dir)
    }

    async fn client_pair() -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, peer) = listener.accept().await.unwrap();
        (client, Connection::from_accepted(server_stream, peer))
    }

    async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match tokio::time::timeout(Duration::from_millis(200), stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(_)) => break,
            }
        }
        buf
    }

    #[tokio::test]
    async fn miss_then_hit_fetches_origin_exactly_once() {
        let (origin_port, captured, origin) = mock_origin(1, b"HELLO").await;
        let (shared, _dir) = shared_with(&[]).await;

        for _ in 0..2 {
            let (mut client, conn) = client_pair().await;
            let req = format!(
                "GET http://127.0.0.1:{origin_port}/ HTTP/1.1\r\nHost: 127.0.0.1:{origin_port}\r\n\r\n"
            );
            client.write_all(req.as_bytes()).await.unwrap();
            serve(conn, shared.clone()).await;
            let resp = read_all(&mut client).await;
            assert!(resp.ends_with(b"HELLO"));
        }

        let _ = origin.await;
        assert_eq!(captured.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn blocked_host_receives_403_without_contacting_origin() {
        let (shared, _dir) = shared_with(&["203.0.113.9".parse().unwrap()]).await;

        let (mut client, conn) = client_pair().await;
        let req = "GET http://203.0.113.9/x HTTP/1.1\r\nHost: 203.0.113.9\r\n\r\n";
        client.write_all(req.as_bytes()).await.unwrap();
        serve(conn, shared).await;

        let resp = read_all(&mut client).await;
        assert!(resp.starts_with(b"HTTP/1.1 403"));
    }

    #[tokio::test]
    async fn header_rewriting_strips_proxy_headers_and_sets_markers() {
        let (origin_port, captured, origin) = mock_origin(1, b"OK").await;
        let (shared, _dir) = shared_with(&[]).await;

        let (mut client, conn) = client_pair().await;
        let req = format!(
            "GET http://127.0.0.1:{origin_port}/keep-alive-test HTTP/1.1\r\n\
             Host: 127.0.0.1:{origin_port}\r\n\
             Proxy-Connection: keep-alive\r\n\
             Connection: keep-alive\r\n\r\n"
        );
        client.write_all(req.as_bytes()).await.unwrap();
        serve(conn, shared).await;
        let resp = read_all(&mut client).await;
        assert!(resp.starts_with(b"HTTP/1.1 200"));

        let _ = origin.await;
        let requests = captured.lock().await;
        let seen = String::from_utf8_lossy(&requests[0]);
        assert!(seen.contains("Connection: close"));
        assert!(seen.contains("Via: 1.1 proxycache"));
        assert!(seen.contains("Forwarded: 127.0.0.1"));
        assert!(!seen.contains("Proxy-Connection"));
    }

    #[tokio::test]
    async fn idle_connection_is_closed_without_a_response() {
        let mut limits = Limits::default();
        limits.keep_alive = Duration::from_millis(30);
        let (shared, _dir) = shared_with_limits(&[], limits).await;

        let (mut client, conn) = client_pair().await;
        serve(conn, shared).await;

        let resp = read_all(&mut client).await;
        assert!(resp.is_empty(), "idle timeout must close without writing a response");
    }
}
