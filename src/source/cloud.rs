// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::mock;
use super::Origin;
use crate::store::Store;

/// The store key holding the fetched catalog. The key's last-modified time
/// doubles as the catalog's refresh timestamp.
const CATALOG_KEY: &str = "cloud_catalog";

/// The page size requested on catalog refresh.
const PAGE_LIMIT: u32 = 10_000;

/// A single known entry in the remote catalog.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// The remote identifier used to fetch the entry's payload.
    pub id: String,
    /// The entry's display name. Identifiers are derived from it.
    pub name: String,
}

/// Cloud operation failures. Cloneable so one in-flight result can be handed
/// to every coalesced waiter.
#[derive(Clone, Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("state store error: {0}")]
    Store(String),
    #[error("in-flight request dropped before completing")]
    Dropped,
}

/// Remote catalog transport. Implementations make a single attempt per call;
/// retry policy belongs to the implementation, not this layer.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// Fetches one page of catalog entries.
    async fn fetch_catalog_page(
        &self,
        offset: u32,
        limit: u32,
        filter: Option<&str>,
    ) -> Result<Vec<CatalogEntry>, FetchError>;

    /// Fetches the raw payload of a single entry by its catalog id.
    async fn fetch_entry_by_id(&self, id: &str) -> Result<Vec<u8>, FetchError>;
}

/// Gets a catalog fetcher with the given name.
pub fn get_fetcher(name: &str) -> Result<Arc<dyn CatalogFetcher>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Fetcher::get(name)));
    }

    Err(format!("no catalog fetcher named {}", name).into())
}

/// Music entries known to a remote catalog. The catalog itself is cached in
/// the store with a TTL; entry payloads are materialized into a scratch
/// directory on demand and reused until the cache is cleared.
pub struct CloudSource {
    /// Persists the catalog and its refresh timestamp.
    store: Arc<dyn Store>,
    /// The remote transport.
    fetcher: Arc<dyn CatalogFetcher>,
    /// The identifier prefix for entries of this source.
    prefix: String,
    /// How long a fetched catalog stays fresh.
    ttl: Duration,
    /// Where materialized entries are written.
    tmp_dir: PathBuf,
    /// In-flight operations by key. Concurrent identical requests subscribe
    /// to the first one's result instead of fetching again.
    inflight: Mutex<HashMap<String, broadcast::Sender<Result<bool, FetchError>>>>,
}

impl CloudSource {
    /// Creates a new cloud source.
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn CatalogFetcher>,
        prefix: String,
        ttl: Duration,
        tmp_dir: PathBuf,
    ) -> CloudSource {
        CloudSource {
            store,
            fetcher,
            prefix,
            ttl,
            tmp_dir,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Maps the cached catalog to identifiers. Empty if no catalog has ever
    /// been fetched; never triggers a fetch.
    pub fn list_known_entries(&self) -> Vec<String> {
        self.catalog()
            .iter()
            .map(|entry| format!("{}/{}.json", self.prefix, entry.name))
            .collect()
    }

    /// Refreshes the catalog if it is stale or the refresh is forced.
    /// Returns true if a fetch happened, false if the cached catalog was
    /// still fresh. On failure the existing catalog is left untouched.
    pub async fn refresh_catalog(&self, force: bool) -> Result<bool, FetchError> {
        if !force && !self.is_stale() {
            debug!("Catalog is fresh, skipping fetch.");
            return Ok(false);
        }

        self.coalesced(CATALOG_KEY, || async move {
            info!("Fetching cloud music catalog.");
            let entries = self
                .fetcher
                .fetch_catalog_page(0, PAGE_LIMIT, None)
                .await?;
            let serialized =
                serde_json::to_value(&entries).map_err(|e| FetchError::Store(e.to_string()))?;
            self.store
                .set(CATALOG_KEY, &serialized)
                .map_err(|e| FetchError::Store(e.to_string()))?;
            info!(entries = entries.len(), "Fetched cloud music catalog.");
            Ok(true)
        })
        .await
    }

    /// Fetches the payload of the identified entry into the scratch
    /// directory. Returns true if the entry was fetched and written, false if
    /// the identifier names nothing in the cached catalog. On failure nothing
    /// is written.
    pub async fn materialize_entry(&self, identifier: &str) -> Result<bool, FetchError> {
        let entry_name = match super::classify(identifier, &self.prefix) {
            Origin::Cloud { entry } => entry,
            _ => {
                warn!(identifier, "Identifier is not a cloud entry.");
                return Ok(false);
            }
        };

        let entry = self
            .catalog()
            .into_iter()
            .find(|entry| format!("{}.json", entry.name) == entry_name);
        let entry = match entry {
            Some(entry) => entry,
            None => {
                warn!(identifier, "No catalog entry matches the identifier.");
                return Ok(false);
            }
        };

        self.coalesced(identifier, || async move {
            info!(
                name = entry.name,
                id = entry.id,
                "Fetching cloud music file."
            );
            let payload = self.fetcher.fetch_entry_by_id(&entry.id).await?;

            // The payload is complete before anything is written, so a failed
            // fetch never leaves a partial file behind.
            fs::create_dir_all(&self.tmp_dir).map_err(|e| FetchError::Store(e.to_string()))?;
            let dest = self.tmp_dir.join(format!("{}.json", entry.name));
            fs::write(&dest, payload).map_err(|e| FetchError::Store(e.to_string()))?;
            info!(name = entry.name, "Fetched cloud music file.");
            Ok(true)
        })
        .await
    }

    /// Returns the materialized path for the identifier if and only if it
    /// already exists on disk. Never triggers a fetch.
    pub fn load_from_cache(&self, identifier: &str) -> Option<PathBuf> {
        match super::classify(identifier, &self.prefix) {
            Origin::Cloud { entry } => {
                let path = self.tmp_dir.join(entry);
                if path.exists() {
                    Some(path)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// True if the catalog has never been fetched or its last refresh is
    /// older than the TTL.
    fn is_stale(&self) -> bool {
        match self.store.last_modified(CATALOG_KEY) {
            Some(refreshed) => refreshed
                .elapsed()
                .map(|elapsed| elapsed > self.ttl)
                .unwrap_or(true),
            None => true,
        }
    }

    /// The cached catalog, or empty if never fetched.
    fn catalog(&self) -> Vec<CatalogEntry> {
        match self.store.get(CATALOG_KEY) {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Runs the operation unless an identical one is already in flight, in
    /// which case the result of the in-flight operation is awaited instead.
    async fn coalesced<F, Fut>(&self, key: &str, op: F) -> Result<bool, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, FetchError>>,
    {
        enum Role {
            Leader(broadcast::Sender<Result<bool, FetchError>>),
            Follower(broadcast::Receiver<Result<bool, FetchError>>),
        }

        let role = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(sender) => Role::Follower(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    inflight.insert(key.to_string(), sender.clone());
                    Role::Leader(sender)
                }
            }
        };

        match role {
            Role::Leader(sender) => {
                let result = op().await;
                self.inflight.lock().remove(key);
                // Waiters may have all gone away; that's fine.
                let _ = sender.send(result.clone());
                result
            }
            Role::Follower(mut receiver) => {
                debug!(key, "Awaiting identical in-flight request.");
                receiver.recv().await.unwrap_or(Err(FetchError::Dropped))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::mock;
    use super::{CatalogEntry, CloudSource, FetchError};
    use crate::store::FileStore;

    fn cloud_source(
        dir: &std::path::Path,
        ttl: Duration,
    ) -> Result<(CloudSource, Arc<mock::Fetcher>), Box<dyn Error>> {
        let store = Arc::new(FileStore::new(dir.join("state"))?);
        let fetcher = Arc::new(mock::Fetcher::get("mock"));
        fetcher.set_entries(vec![
            CatalogEntry {
                id: "41".to_string(),
                name: "one".to_string(),
            },
            CatalogEntry {
                id: "42".to_string(),
                name: "two".to_string(),
            },
        ]);
        let source = CloudSource::new(
            store,
            Arc::clone(&fetcher) as Arc<dyn super::CatalogFetcher>,
            "cloud:catalog".to_string(),
            ttl,
            dir.join("tmp"),
        );
        Ok((source, fetcher))
    }

    #[tokio::test]
    async fn test_refresh_respects_ttl() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (source, fetcher) = cloud_source(tempdir.path(), Duration::from_secs(3600))?;

        assert!(source.list_known_entries().is_empty());

        // The first unforced refresh fetches, the second is within the TTL.
        assert!(source.refresh_catalog(false).await?);
        assert!(!source.refresh_catalog(false).await?);
        assert_eq!(1, fetcher.catalog_fetches());

        assert_eq!(
            vec!["cloud:catalog/one.json", "cloud:catalog/two.json"],
            source.list_known_entries()
        );

        // Forced refreshes fetch every time.
        assert!(source.refresh_catalog(true).await?);
        assert!(source.refresh_catalog(true).await?);
        assert_eq!(3, fetcher.catalog_fetches());

        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_catalog() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (source, fetcher) = cloud_source(tempdir.path(), Duration::from_secs(3600))?;

        source.refresh_catalog(true).await?;
        let before = source.list_known_entries();
        assert_eq!(2, before.len());

        fetcher.set_fail("remote unavailable");
        match source.refresh_catalog(true).await {
            Err(FetchError::Fetch(message)) => assert_eq!("remote unavailable", message),
            other => panic!("expected fetch failure, got {:?}", other),
        }

        // The previously fetched catalog is untouched.
        assert_eq!(before, source.list_known_entries());

        Ok(())
    }

    #[tokio::test]
    async fn test_materialize_roundtrip() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (source, fetcher) = cloud_source(tempdir.path(), Duration::from_secs(3600))?;
        source.refresh_catalog(true).await?;
        fetcher.set_payload("41", b"{\"notes\": []}".to_vec());

        let identifier = "cloud:catalog/one.json";
        assert!(source.load_from_cache(identifier).is_none());

        assert!(source.materialize_entry(identifier).await?);
        let path = source
            .load_from_cache(identifier)
            .expect("materialized entry should be cached");
        assert_eq!(b"{\"notes\": []}".to_vec(), std::fs::read(&path)?);

        // Unknown names have no effect beyond a warning.
        assert!(!source.materialize_entry("cloud:catalog/nope.json").await?);
        assert_eq!(1, fetcher.entry_fetches());

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (source, fetcher) = cloud_source(tempdir.path(), Duration::from_secs(3600))?;
        fetcher.set_delay(Duration::from_millis(50));

        let (first, second) = tokio::join!(
            source.refresh_catalog(true),
            source.refresh_catalog(true)
        );
        assert!(first?);
        assert!(second?);
        assert_eq!(1, fetcher.catalog_fetches());

        Ok(())
    }
}
