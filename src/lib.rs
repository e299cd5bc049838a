//! proxycache - a forwarding HTTP/1.1 proxy with a single-flight,
//! disk-backed content cache.
//!
//! # Architecture
//!
//! Three subsystems compose the pipeline for every accepted connection:
//!
//! - **HTTP message engine** ([`http::message`]) - an incremental, chunked
//!   reader that extracts a header line, header map, and `Content-Length`-
//!   framed body from a socket under an idle-poll timeout, and serializes
//!   messages back out.
//! - **Request/response pipeline** ([`http::request`], [`http::response`]) -
//!   absolute-form request-line parsing, hop-by-hop header rewriting for
//!   proxy semantics, origin fetch, and synthesized error responses.
//! - **Content cache** ([`cache`]) - a bucketed, fingerprinted, TTL-expiring
//!   cache keyed by `(host, path)`, guaranteeing at most one in-flight
//!   origin fetch per key while every other reader waits on the result.
//!
//! [`server::run`] ties these together: bind, accept, spawn one task per
//! connection, and drain gracefully on interrupt.
//!
//! # Non-goals
//!
//! No TLS/HTTPS termination or tunneling, no HTTP/2, no chunked
//! transfer-encoding (bodies are `Content-Length`-framed only), no upstream
//! keep-alive connection reuse, no authentication, no config reload, no
//! prefetching.

pub(crate) mod blocklist;
pub(crate) mod cache;
pub mod config;
pub(crate) mod errors;
pub(crate) mod http;
pub mod limits;
pub(crate) mod net;
pub mod server;
pub(crate) mod worker;
