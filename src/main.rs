//! `proxy <port> <cache_ttl_seconds> [<prefetch_depth>] [-v]`
//!
//! A thin binary entry point delegating to [`proxycache::server::run`],
//! following the pack convention of a `clap`-derived args struct feeding a
//! `run() -> exit code` core (`kowito-chopin/crates/chopin-cli`).

use clap::Parser;
use proxycache::config::Args;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let code = proxycache::server::run(args).await;
    std::process::exit(code);
}
