//! Error kinds shared across the connection, message, request/response, and
//! cache layers, plus their mapping onto a synthesized client response.
//!
//! Grounded on the teacher's `errors::ErrorKind` (one flat enum, one mapping
//! to wire bytes via `as_http`), generalized from the teacher's compile-time
//! `concat!` byte tables to a runtime mapping onto `Response::synthesize_error`,
//! since the reason phrase here comes from an owned `Response`, not a
//! `&'static` literal baked in at compile time.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request line: {0}")]
    ParseError(String),

    #[error("header region exceeds limit")]
    HeaderTooLarge,

    #[error("body exceeds limit")]
    BodyTooLarge,

    #[error("trailing bytes beyond content-length")]
    FramingError,

    #[error("idle timeout waiting for data")]
    IdleTimeout,

    #[error("peer closed connection")]
    PeerClosed,

    #[error("transport error: {0}")]
    TransportError(#[from] std::io::Error),

    #[error("dns resolution failed for {0}")]
    DnsError(String),

    #[error("failed to connect to origin: {0}")]
    ConnectError(String),

    #[error("host is blocked")]
    BlockedHost,

    #[error("origin fetch failed: {0}")]
    FetchFailed(String),

    #[error("cache I/O error: {0}")]
    CacheIoError(String),
}

/// Whether an error should be surfaced to the client as a synthesized
/// response, or simply close the connection with nothing written
/// (spec.md §8: idle timeout and peer-closed-early both close silently).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Respond(u16, &'static str),
    CloseSilently,
}

impl ProxyError {
    /// Reclassifies a cache-internal I/O failure as an upstream failure, per
    /// spec.md §7: "Cache I/O errors surface as `FetchFailed` to the
    /// worker." Every other kind passes through unchanged.
    pub(crate) fn into_fetch_failed(self) -> ProxyError {
        match self {
            ProxyError::CacheIoError(msg) => ProxyError::FetchFailed(msg),
            other => other,
        }
    }

    /// Maps an error to the response the worker must send, per spec.md §7's
    /// propagation table.
    pub(crate) fn disposition(&self) -> Disposition {
        match self {
            ProxyError::ParseError(_) | ProxyError::HeaderTooLarge | ProxyError::FramingError => {
                Disposition::Respond(400, "Bad Request")
            }
            ProxyError::BodyTooLarge => Disposition::Respond(400, "Bad Request"),
            ProxyError::IdleTimeout | ProxyError::PeerClosed => Disposition::CloseSilently,
            ProxyError::BlockedHost => Disposition::Respond(403, "Forbidden"),
            ProxyError::DnsError(_) | ProxyError::ConnectError(_) | ProxyError::FetchFailed(_) => {
                Disposition::Respond(504, "Gateway Timeout")
            }
            ProxyError::TransportError(_) | ProxyError::CacheIoError(_) => {
                Disposition::Respond(500, "Internal Server Error")
            }
        }
    }
}
