//! CLI surface: `proxy <port> <cache_ttl_seconds> [<prefetch_depth>] [-v]`.
//!
//! Grounded on the pack convention of a `clap`-derived args struct feeding a
//! thin binary entry point (`kowito-chopin/crates/chopin-cli`); the teacher
//! itself has no CLI (it is a library, not a process).

use clap::Parser;

/// Positional/flag arguments accepted by the `proxy` binary.
///
/// `prefetch_depth` is accepted and stored for forward compatibility but
/// never read (spec.md §1 Non-goals: "the presence of a prefetch-depth flag
/// ... is accepted but its behavior is not specified here").
#[derive(Debug, Parser)]
#[command(name = "proxy", about = "Forwarding HTTP/1.1 proxy with a single-flight disk cache")]
pub struct Args {
    /// TCP port to listen on.
    pub port: u16,

    /// Time-to-live, in seconds, for a cache entry's freshness window.
    pub cache_ttl_seconds: u64,

    /// Unused prefetch-depth hint, accepted for compatibility.
    pub prefetch_depth: Option<u64>,

    /// Raise the log filter from `info` to `debug`.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Path to the blocklist file.
    #[arg(long = "blocklist", default_value = "./blocklist")]
    pub blocklist_path: std::path::PathBuf,

    /// Path to the cache directory.
    #[arg(long = "cache-dir", default_value = "./cache")]
    pub cache_dir: std::path::PathBuf,
}
