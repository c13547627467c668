//! module cache
//!
//! Two layers:
//! - [ModuleCache]: directory on disk, one entry per source (named by the SHA-256 of the source string). Entries
//!   are written to a staging directory first and renamed into place, so an entry that exists is complete.
//!   Deleting the directory only costs a re-fetch.
//! - [FetchOnce]: per-run table guaranteeing at most one fetch per source. Concurrent callers for the same
//!   source wait for the pending fetch and share its outcome. A fetch whose future is dropped leaves the table
//!   entry empty, the next caller fetches again.
use crate::fetch::{FetchClient, FetchError, Fetched};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

#[derive(Debug, Clone)]
pub struct ModuleCache {
    root: PathBuf,
}

impl ModuleCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a staged fetch of `source` is stored in
    pub fn entry_path(&self, source: &str) -> PathBuf {
        self.root
            .join(format!("{:x}", Sha256::digest(source.as_bytes())))
    }

    /// Returns the module root for `source`, fetching it if the cache has no entry yet
    pub async fn materialize(
        &self,
        source: &str,
        fetcher: &dyn FetchClient,
    ) -> Result<PathBuf, FetchError> {
        let entry = self.entry_path(source);
        if tokio::fs::metadata(&entry)
            .await
            .is_ok_and(|metadata| metadata.is_dir())
        {
            tracing::debug!(source, path=%entry.display(), "module cache hit");
            return Ok(entry);
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?;
        let dest = staging.path().join("module");

        match fetcher.fetch(source, &dest).await? {
            Fetched::InPlace(path) => Ok(path),
            Fetched::Staged => {
                if let Err(e) = tokio::fs::rename(&dest, &entry).await {
                    // lost a race against another process populating the same entry
                    if !entry.is_dir() {
                        return Err(e.into());
                    }
                }
                tracing::debug!(source, path=%entry.display(), "module cached");
                Ok(entry)
            }
        }
    }
}

type FetchResult = Result<PathBuf, Arc<FetchError>>;

/// At-most-one fetch per source
#[derive(Default)]
pub struct FetchOnce {
    entries: Mutex<HashMap<String, Arc<OnceCell<FetchResult>>>>,
}

impl FetchOnce {
    pub async fn get_or_fetch(
        &self,
        source: &str,
        cache: &ModuleCache,
        fetcher: &dyn FetchClient,
    ) -> FetchResult {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(source.to_string()).or_default())
        };

        if let Some(result) = cell.get() {
            tracing::trace!(source, "fetch already resolved");
            return result.clone();
        }

        cell.get_or_init(|| async {
            cache
                .materialize(source, fetcher)
                .await
                .map_err(Arc::new)
        })
        .await
        .clone()
    }
}

impl std::fmt::Debug for FetchOnce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("FetchOnce")
            .field("sources", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Writes a `main.tf` per fetch, optionally after a delay
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl FetchClient for CountingFetcher {
        async fn fetch(&self, _source: &str, dest: &Path) -> Result<Fetched, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            tokio::fs::create_dir_all(dest).await?;
            tokio::fs::write(dest.join("main.tf"), "").await?;
            Ok(Fetched::Staged)
        }
    }

    /// Never finishes the first fetch
    #[derive(Default)]
    struct HangingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchClient for HangingFetcher {
        async fn fetch(&self, source: &str, dest: &Path) -> Result<Fetched, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            CountingFetcher::default().fetch(source, dest).await
        }
    }

    #[tokio::test]
    async fn staged_fetch_lands_in_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModuleCache::new(dir.path().join("modules"));
        let fetcher = CountingFetcher::default();

        let root = cache.materialize("example", &fetcher).await.unwrap();
        assert_eq!(root, cache.entry_path("example"));
        assert!(root.join("main.tf").is_file());

        // complete entries are reused across runs
        let again = cache.materialize("example", &fetcher).await.unwrap();
        assert_eq!(again, root);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // no staging leftovers
        let leftovers = std::fs::read_dir(cache.root())
            .unwrap()
            .filter(|entry| {
                entry
                    .as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with('.')
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModuleCache::new(dir.path());
        let fetcher = CountingFetcher {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let once = FetchOnce::default();

        let (a, b, c) = tokio::join!(
            once.get_or_fetch("example", &cache, &fetcher),
            once.get_or_fetch("example", &cache, &fetcher),
            once.get_or_fetch("other", &cache, &fetcher),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_shared() {
        struct Failing(AtomicUsize);

        #[async_trait]
        impl FetchClient for Failing {
            async fn fetch(&self, source: &str, _dest: &Path) -> Result<Fetched, FetchError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Unsupported(source.to_string()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = ModuleCache::new(dir.path());
        let fetcher = Failing(AtomicUsize::new(0));
        let once = FetchOnce::default();

        assert!(once.get_or_fetch("bad", &cache, &fetcher).await.is_err());
        assert!(once.get_or_fetch("bad", &cache, &fetcher).await.is_err());
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_fetch_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModuleCache::new(dir.path());
        let fetcher = HangingFetcher::default();
        let once = FetchOnce::default();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            once.get_or_fetch("example", &cache, &fetcher),
        )
        .await;
        assert!(abandoned.is_err());

        let root = once
            .get_or_fetch("example", &cache, &fetcher)
            .await
            .unwrap();
        assert!(root.join("main.tf").is_file());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
