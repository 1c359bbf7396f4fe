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
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::cloud::{CatalogEntry, CatalogFetcher, FetchError};

/// A mock catalog fetcher. Serves scripted entries and payloads without
/// talking to any remote service.
pub struct Fetcher {
    name: String,
    entries: Mutex<Vec<CatalogEntry>>,
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    fail: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    catalog_fetches: AtomicUsize,
    entry_fetches: AtomicUsize,
}

impl Fetcher {
    /// Gets the given mock fetcher.
    pub fn get(name: &str) -> Fetcher {
        Fetcher {
            name: name.to_string(),
            entries: Mutex::new(Vec::new()),
            payloads: Mutex::new(HashMap::new()),
            fail: Mutex::new(None),
            delay: Mutex::new(None),
            catalog_fetches: AtomicUsize::new(0),
            entry_fetches: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    /// Scripts the catalog entries served by this fetcher.
    pub fn set_entries(&self, entries: Vec<CatalogEntry>) {
        *self.entries.lock() = entries;
    }

    #[cfg(test)]
    /// Scripts the payload served for the given entry id.
    pub fn set_payload(&self, id: &str, payload: Vec<u8>) {
        self.payloads.lock().insert(id.to_string(), payload);
    }

    #[cfg(test)]
    /// Makes every subsequent fetch fail with the given message.
    pub fn set_fail(&self, message: &str) {
        *self.fail.lock() = Some(message.to_string());
    }

    #[cfg(test)]
    /// Delays every subsequent fetch, for exercising in-flight coalescing.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    #[cfg(test)]
    /// The number of catalog page fetches attempted.
    pub fn catalog_fetches(&self) -> usize {
        self.catalog_fetches.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    /// The number of entry fetches attempted.
    pub fn entry_fetches(&self) -> usize {
        self.entry_fetches.load(Ordering::Relaxed)
    }

    async fn apply_delay(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn scripted_failure(&self) -> Option<FetchError> {
        self.fail
            .lock()
            .as_ref()
            .map(|message| FetchError::Fetch(message.clone()))
    }
}

#[async_trait]
impl CatalogFetcher for Fetcher {
    async fn fetch_catalog_page(
        &self,
        offset: u32,
        limit: u32,
        _filter: Option<&str>,
    ) -> Result<Vec<CatalogEntry>, FetchError> {
        self.apply_delay().await;
        self.catalog_fetches.fetch_add(1, Ordering::Relaxed);
        if let Some(failure) = self.scripted_failure() {
            return Err(failure);
        }

        let entries = self.entries.lock();
        let start = (offset as usize).min(entries.len());
        let end = (start + limit as usize).min(entries.len());
        Ok(entries[start..end].to_vec())
    }

    async fn fetch_entry_by_id(&self, id: &str) -> Result<Vec<u8>, FetchError> {
        self.apply_delay().await;
        self.entry_fetches.fetch_add(1, Ordering::Relaxed);
        if let Some(failure) = self.scripted_failure() {
            return Err(failure);
        }

        self.payloads
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| FetchError::Fetch(format!("no entry with id {}", id)))
    }
}

impl fmt::Display for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
