//! Loads `./blocklist`, resolving each line to an IPv4 address eagerly at
//! startup, and answers whether a given host resolves to a blocked address.
//!
//! Out of scope per spec.md §1 ("trivial line-oriented input producing a
//! set of resolved IPv4 addresses"), but the process still needs a working
//! implementation to run — kept deliberately simple rather than the
//! teacher's pluggable `ConnectionFilter` trait, since spec.md's blocklist
//! is a fixed IPv4 set, not an extensible filter chain.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use tokio::net::lookup_host;

#[derive(Debug, Default)]
pub(crate) struct Blocklist {
    addresses: HashSet<Ipv4Addr>,
}

impl Blocklist {
    /// Reads `path` line by line, skipping blank lines, resolving each
    /// remaining line as a literal IPv4 or hostname. Unresolvable lines log
    /// a warning and are skipped (spec.md §6).
    pub(crate) async fn load(path: &Path) -> Self {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "blocklist file unreadable, starting empty");
                return Self::default();
            }
        };

        let mut addresses = HashSet::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match resolve_ipv4(line).await {
                Some(ip) => {
                    addresses.insert(ip);
                }
                None => tracing::warn!(host = %line, "could not resolve blocklist entry, skipping"),
            }
        }
        Self { addresses }
    }

    /// Resolves `host`'s IPv4 address and checks it against the set
    /// (spec.md §3: "`check(host)` returns true iff the resolved IPv4 of
    /// `host` equals any stored address").
    pub(crate) async fn is_blocked(&self, host: &str) -> bool {
        match resolve_ipv4(host).await {
            Some(ip) => self.addresses.contains(&ip),
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_addresses(addresses: HashSet<Ipv4Addr>) -> Self {
        Self { addresses }
    }
}

async fn resolve_ipv4(host: &str) -> Option<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(ip);
    }
    let mut addrs = lookup_host((host, 0)).await.ok()?;
    addrs.find_map(|addr| match addr.ip() {
        std::net::IpAddr::V4(v4) => Some(v4),
        std::net::IpAddr::V6(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_ipv4_literals_and_checks_membership() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "203.0.113.9").unwrap();
        writeln!(file, "").unwrap();
        writeln!(file, "203.0.113.10").unwrap();

        let list = Blocklist::load(file.path()).await;
        assert!(list.is_blocked("203.0.113.9").await);
        assert!(list.is_blocked("203.0.113.10").await);
        assert!(!list.is_blocked("203.0.113.11").await);
    }

    #[tokio::test]
    async fn missing_file_yields_empty_list() {
        let list = Blocklist::load(Path::new("/nonexistent/blocklist")).await;
        assert!(!list.is_blocked("127.0.0.1").await);
    }
}
