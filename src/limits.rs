//! Tunable limits and timeouts for the connection, message, and cache layers.
//!
//! This collapses the teacher's `ServerLimits`/`ConnLimits`/`ReqLimits`/
//! `RespLimits` foursome into a single struct, since this proxy has one
//! connection role (accept from client, originate to origin) instead of the
//! teacher's many independently tunable axes.

use std::time::Duration;

/// Limits governing connection I/O, message framing, and the cache.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Size in bytes of each read performed while filling the message
    /// buffer. Default `1024` (spec.md §4.2 `CHUNK`).
    pub chunk: usize,

    /// How long a read may idle before the connection is aborted with
    /// `IdleTimeout`. Default `10_000` ms (spec.md §4.2 `KEEP_ALIVE_MS`).
    pub keep_alive: Duration,

    /// Hard cap on the header region (header line + headers + terminating
    /// blank line). Default `8192` bytes (spec.md §4.2 `MAX_HEADER`).
    pub max_header: usize,

    /// Hard cap on `Content-Length`. Default 4 GiB (spec.md §4.2
    /// `MAX_BODY`).
    pub max_body: u64,

    /// Number of buckets in the cache's hash index. Must be a power of two,
    /// at least 1024 (spec.md §3).
    pub cache_buckets: usize,

    /// Backstop wait when the coordination loop observes `IN_FLIGHT` or a
    /// contended `STALE` entry and no wakeup arrives in time. Bounds a
    /// missed `Notify` in spec.md §4.5's coordination loop.
    pub single_flight_backoff: Duration,

    /// Maximum number of connections accepted concurrently before the
    /// supervisor's spawn loop backs off. Not named directly by spec.md,
    /// which leaves worker scheduling as an external concern; kept as a
    /// defensive bound the way the teacher bounds `ServerLimits::max_connections`.
    pub max_connections: usize,

    /// Whether a `Cache-Control: no-cache` request header disables
    /// cacheability. spec.md §4.3 explicitly says honoring this is
    /// optional; defaulted off so the literal end-to-end scenarios in
    /// spec.md §8 are unaffected unless an operator opts in.
    pub honor_no_cache: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            chunk: 1024,
            keep_alive: Duration::from_millis(10_000),
            max_header: 8192,
            max_body: 4 * 1024 * 1024 * 1024,
            cache_buckets: 1024,
            single_flight_backoff: Duration::from_millis(50),
            max_connections: 1024,
            honor_no_cache: false,
        }
    }
}
