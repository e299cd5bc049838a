//! The bucketed, single-flight, disk-backed content cache.
//!
//! A subsystem the teacher has no counterpart for at all (a server library
//! never caches anything it didn't build itself); grounded directly on
//! spec.md §4.5/§5. The single mutex guarding the whole index is spec.md's
//! own explicit design constraint (§5), not a teacher import. The
//! notify-based coordination loop (vs. busy polling) follows the general
//! Tokio idiom the teacher already uses elsewhere for timed waits
//! (`tokio::select!`/`sleep` in `src/server/connection.rs`).

mod entry;

use crate::errors::ProxyError;
use crate::limits::Limits;
use entry::{Entry, Status};
use md5::{Digest, Md5};
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

struct Index {
    buckets: Vec<Vec<Entry>>,
    total_users: u64,
}

/// The outcome of a [`Cache::get`] call.
pub(crate) enum Hit {
    /// Bytes this call's resolver just fetched from origin and wrote to
    /// disk; already fully in memory, nothing left to release.
    Resolved(Vec<u8>),
    /// A pre-existing fresh entry. The body must be streamed from `path`
    /// rather than buffered; `read` must be passed to
    /// [`Cache::release_read`] once the caller is done reading it.
    Cached { path: PathBuf, read: CacheRead },
}

/// An outstanding reader's claim on an entry's `users` count, obtained from
/// [`Hit::Cached`]. Opaque outside this module so only `Cache` can mint or
/// redeem one.
pub(crate) struct CacheRead {
    bucket: usize,
    key: String,
}

/// A bucketed hash index over the fingerprint of `(host, path)` keys, with
/// single-flight resolution per key and a TTL-bounded freshness window.
pub(crate) struct Cache {
    dir: PathBuf,
    ttl: Duration,
    bucket_count: usize,
    backoff: Duration,
    index: Mutex<Index>,
    notify: Notify,
}

impl Cache {
    pub(crate) async fn new(dir: PathBuf, ttl: Duration, limits: &Limits) -> Result<Self, ProxyError> {
        tokio::fs::create_dir_all(&dir).await?;
        let bucket_count = limits.cache_buckets.max(1024).next_power_of_two();
        Ok(Self {
            dir,
            ttl,
            bucket_count,
            backoff: limits.single_flight_backoff,
            index: Mutex::new(Index {
                buckets: (0..bucket_count).map(|_| Vec::new()).collect(),
                total_users: 0,
            }),
            notify: Notify::new(),
        })
    }

    /// Looks up `key`, driving the coordination loop of spec.md §4.5.
    ///
    /// `resolver` is invoked at most once, only by the single worker that
    /// claims the `STALE -> IN_FLIGHT` transition, and must resolve to the
    /// raw bytes of the upstream response. On success, those bytes are
    /// written to disk as `cache_set` and the entry is promoted to
    /// `FRESH`. On failure, the entry rolls back to `STALE` so a later
    /// caller may retry (spec.md §9 Open Question).
    ///
    /// A fresh hit never loads the cached body into memory here: it returns
    /// [`Hit::Cached`] with a path and a [`CacheRead`] claim, so the caller
    /// can stream the body straight off disk (spec.md §3's "owned file
    /// handle, for large / cached bodies" body representation) and call
    /// [`Cache::release_read`] once the transfer is done.
    pub(crate) async fn get<F, Fut>(&self, key: &str, resolver: F) -> Result<Hit, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, ProxyError>>,
    {
        debug_assert!(!key.is_empty(), "cache.get called with a non-cacheable key");

        let fingerprint = fingerprint_of(key);
        let fingerprint_hex = hex::encode(fingerprint);
        let bucket = bucket_index(&fingerprint, self.bucket_count);

        let mut resolver = Some(resolver);

        loop {
            let mut guard = self.index.lock().await;
            let idx = entry_index(&mut guard.buckets[bucket], key, &fingerprint_hex, &self.dir);

            match guard.buckets[bucket][idx].status {
                Status::Fresh => {
                    let fresh = guard.buckets[bucket][idx]
                        .materialized_at
                        .is_some_and(|t| t.elapsed() <= self.ttl);
                    if !fresh {
                        guard.buckets[bucket][idx].status = Status::Stale;
                        drop(guard);
                        continue;
                    }
                    guard.buckets[bucket][idx].users += 1;
                    guard.total_users += 1;
                    let path = guard.buckets[bucket][idx].path.clone();
                    drop(guard);

                    return Ok(Hit::Cached {
                        path,
                        read: CacheRead {
                            bucket,
                            key: key.to_string(),
                        },
                    });
                }
                Status::InFlight => {
                    drop(guard);
                    self.wait_for_change().await;
                    continue;
                }
                Status::Stale => {
                    if guard.buckets[bucket][idx].users != 0 {
                        drop(guard);
                        self.wait_for_change().await;
                        continue;
                    }
                    guard.buckets[bucket][idx].status = Status::InFlight;
                    guard.buckets[bucket][idx].users += 1;
                    guard.total_users += 1;
                    let path = guard.buckets[bucket][idx].path.clone();
                    drop(guard);

                    let resolve = resolver.take().expect("resolver invoked more than once");
                    return match resolve().await {
                        Ok(bytes) => match cache_set(&path, &bytes).await {
                            Ok(()) => {
                                self.mark_fresh(bucket, key).await;
                                self.release(bucket, key).await;
                                Ok(Hit::Resolved(bytes))
                            }
                            Err(e) => {
                                self.rollback(bucket, key).await;
                                Err(e.into_fetch_failed())
                            }
                        },
                        Err(e) => {
                            self.rollback(bucket, key).await;
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    /// Releases a [`CacheRead`] claim obtained from a [`Hit::Cached`],
    /// decrementing `entry.users`/`cache.users`. Must be called exactly
    /// once, after the caller has finished reading the entry's on-disk
    /// body (spec.md §3 invariant: a reader holds `users >= 1` until it
    /// finishes reading).
    pub(crate) async fn release_read(&self, read: CacheRead) {
        self.release(read.bucket, &read.key).await;
    }

    async fn mark_fresh(&self, bucket: usize, key: &str) {
        let mut guard = self.index.lock().await;
        if let Some(entry) = guard.buckets[bucket].iter_mut().find(|e| e.key == key) {
            entry.status = Status::Fresh;
            entry.materialized_at = Some(Instant::now());
        }
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Decrements `entry.users`/`cache.users` for a reader that has
    /// finished (either a fresh-hit reader or the resolving worker itself).
    async fn release(&self, bucket: usize, key: &str) {
        let mut guard = self.index.lock().await;
        if let Some(entry) = guard.buckets[bucket].iter_mut().find(|e| e.key == key) {
            entry.users = entry.users.saturating_sub(1);
        }
        guard.total_users = guard.total_users.saturating_sub(1);
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Rolls a claimed `IN_FLIGHT` entry back to `STALE` after a resolver
    /// failure, per spec.md §9's Open Question resolution.
    async fn rollback(&self, bucket: usize, key: &str) {
        let mut guard = self.index.lock().await;
        if let Some(entry) = guard.buckets[bucket].iter_mut().find(|e| e.key == key) {
            entry.status = Status::Stale;
            entry.users = entry.users.saturating_sub(1);
        }
        guard.total_users = guard.total_users.saturating_sub(1);
        drop(guard);
        self.notify.notify_waiters();
    }

    async fn wait_for_change(&self) {
        let notified = self.notify.notified();
        let _ = tokio::time::timeout(self.backoff, notified).await;
    }

    /// Blocks until every in-flight reader has released the cache, then
    /// lets the index drop. On-disk files persist across restarts.
    pub(crate) async fn shutdown(&self) {
        loop {
            if self.index.lock().await.total_users == 0 {
                return;
            }
            tokio::time::sleep(self.backoff).await;
        }
    }
}

/// Finds or creates the entry record for `key` in `bucket`, returning its
/// index. Must be called with the index mutex held.
fn entry_index(bucket: &mut Vec<Entry>, key: &str, fingerprint_hex: &str, dir: &std::path::Path) -> usize {
    if let Some(pos) = bucket.iter().position(|e| e.key == key) {
        return pos;
    }
    bucket.push(Entry::new(
        key.to_string(),
        fingerprint_hex.to_string(),
        dir.join(fingerprint_hex),
    ));
    bucket.len() - 1
}

/// Writes `bytes` to `path` as a single atomic replace: write to a
/// temporary file in the same directory, then rename over the target.
/// Callable only from within a resolver invocation (spec.md §4.5).
async fn cache_set(path: &std::path::Path, bytes: &[u8]) -> Result<(), ProxyError> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| ProxyError::CacheIoError(e.to_string()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ProxyError::CacheIoError(e.to_string()))
}

fn fingerprint_of(key: &str) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

fn bucket_index(fingerprint: &[u8; 16], bucket_count: usize) -> usize {
    let n = u64::from_be_bytes(fingerprint[0..8].try_into().expect("16-byte fingerprint"));
    (n % bucket_count as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn cache() -> (Cache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf(), Duration::from_secs(60), &Limits::default())
            .await
            .unwrap();
        (cache, dir)
    }

    /// Resolves a `Hit` to its bytes, reading straight from disk and
    /// releasing the read claim for the `Cached` case, exercising the same
    /// path a worker streaming a cache hit would take.
    async fn hit_bytes(cache: &Cache, hit: Hit) -> Vec<u8> {
        match hit {
            Hit::Resolved(bytes) => bytes,
            Hit::Cached { path, read } => {
                let bytes = tokio::fs::read(&path).await.unwrap();
                cache.release_read(read).await;
                bytes
            }
        }
    }

    #[tokio::test]
    async fn miss_then_hit_invokes_resolver_once() {
        let (cache, _dir) = cache().await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let hit = cache
                .get("example/", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(b"HELLO".to_vec())
                })
                .await
                .unwrap();
            assert_eq!(hit_bytes(&cache, hit).await, b"HELLO");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(
            dir.path().to_path_buf(),
            Duration::from_millis(10),
            &Limits::default(),
        )
        .await
        .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let hit = cache
            .get("k", || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(b"A".to_vec())
            })
            .await
            .unwrap();
        hit_bytes(&cache, hit).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        let c = calls.clone();
        let hit = cache
            .get("k", || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(b"B".to_vec())
            })
            .await
            .unwrap();
        hit_bytes(&cache, hit).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resolver_failure_rolls_back_to_stale() {
        let (cache, _dir) = cache().await;

        let err = cache
            .get::<_, _>("k", || async { Err(ProxyError::FetchFailed("boom".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::FetchFailed(_)));

        let hit = cache.get("k", || async { Ok(b"RECOVERED".to_vec()) }).await.unwrap();
        assert_eq!(hit_bytes(&cache, hit).await, b"RECOVERED");
    }

    #[tokio::test]
    async fn cache_write_failure_surfaces_as_fetch_failed() {
        let (cache, dir) = cache().await;
        // Replace the cache directory with a path that cannot hold the
        // written entry's temp file, forcing `cache_set` to fail.
        tokio::fs::remove_dir_all(dir.path()).await.unwrap();

        let err = cache
            .get("k", || async { Ok(b"BODY".to_vec()) })
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProxyError::FetchFailed(_)),
            "cache I/O failures must surface as FetchFailed, got {err:?}"
        );
    }

    #[tokio::test]
    async fn concurrent_requests_single_flight_to_one_resolver_call() {
        let (cache, _dir) = cache().await;
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get("shared", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(b"BODY".to_vec())
                    })
                    .await
            }));
        }

        let mut hits = Vec::new();
        for handle in handles {
            hits.push(handle.await.unwrap().unwrap());
        }
        for hit in hits {
            assert_eq!(hit_bytes(&cache, hit).await, b"BODY");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
