//! Connection I/O: bounded, timed send/recv over a TCP stream.
//!
//! Grounded on the teacher's `ConnLimits::write_bytes`/`Parser::fill_buffer`
//! (`tokio::select! { biased; io vs sleep(timeout) }` idiom in
//! `src/server/connection.rs` and `src/http/request.rs`), generalized from
//! "wrap an already-accepted stream" to "also originate an outbound
//! connection to an origin host."

use crate::errors::ProxyError;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{sleep, timeout};

/// An open TCP endpoint plus the presentation form of the remote address.
///
/// Closed exactly once: the underlying `TcpStream` is dropped at most once,
/// since `Connection` owns it outright and never hands out a second owning
/// handle.
pub(crate) struct Connection {
    stream: TcpStream,
    pub(crate) peer: String,
}

impl Connection {
    pub(crate) fn from_accepted(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer: peer.ip().to_string(),
        }
    }

    /// Resolves `host` (treating it as a dotted-quad/IPv6 literal first,
    /// falling back to DNS A/AAAA lookup) and connects to `host:port`.
    pub(crate) async fn connect_to_host(host: &str, port: u16) -> Result<Self, ProxyError> {
        let addr = if let Ok(ip) = host.parse::<IpAddr>() {
            SocketAddr::new(ip, port)
        } else {
            lookup_host((host, port))
                .await
                .map_err(|e| ProxyError::DnsError(format!("{host}: {e}")))?
                .next()
                .ok_or_else(|| ProxyError::DnsError(format!("no addresses for {host}")))?
        };
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ProxyError::ConnectError(format!("{addr}: {e}")))?;
        Ok(Self {
            peer: addr.ip().to_string(),
            stream,
        })
    }

    /// Reads into `buf`, aborting with `IdleTimeout` if nothing arrives
    /// within `keep_alive`.
    pub(crate) async fn read_chunk(
        &mut self,
        buf: &mut [u8],
        keep_alive: Duration,
    ) -> Result<usize, ProxyError> {
        tokio::select! {
            biased;

            result = self.stream.read(buf) => Ok(result?),
            _ = sleep(keep_alive) => Err(ProxyError::IdleTimeout),
        }
    }

    /// Writes the full buffer, retrying partial writes, aborting on a
    /// zero-byte write (broken pipe on most platforms).
    pub(crate) async fn send_all(
        &mut self,
        bytes: &[u8],
        write_timeout: Duration,
    ) -> Result<(), ProxyError> {
        let fut = async {
            let mut sent = 0;
            while sent < bytes.len() {
                let n = self.stream.write(&bytes[sent..]).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "connection closed mid-write",
                    ));
                }
                sent += n;
            }
            Ok(())
        };
        match timeout(write_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProxyError::IdleTimeout),
        }
    }

    /// Streams `len` bytes from `file`'s current offset.
    pub(crate) async fn send_file_range(
        &mut self,
        file: &mut File,
        len: u64,
        write_timeout: Duration,
    ) -> Result<(), ProxyError> {
        let mut remaining = len;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let n = timeout(write_timeout, file.read(&mut buf[..want]))
                .await
                .map_err(|_| ProxyError::IdleTimeout)??;
            if n == 0 {
                return Err(ProxyError::CacheIoError(
                    "cache file shorter than recorded length".into(),
                ));
            }
            self.send_all(&buf[..n], write_timeout).await?;
            remaining -= n as u64;
        }
        Ok(())
    }
}
