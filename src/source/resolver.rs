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
use std::error::Error;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::archive::ArchiveReader;
use super::cloud::{CatalogFetcher, CloudSource};
use super::Origin;
use crate::formats;
use crate::store::Store;

/// The scratch subdirectory holding extracted and materialized entries.
const TMP_SUBDIR: &str = "tmp";

/// Resolves opaque music identifiers across all origins: loose files in the
/// music directory, entries inside zip archives, and cloud catalog entries.
pub struct Resolver {
    /// The directory holding loose files and archives.
    music_dir: PathBuf,
    /// The scratch directory for extracted and materialized entries.
    tmp_dir: PathBuf,
    /// The identifier prefix for cloud entries.
    cloud_prefix: String,
    /// Reads zip archives.
    archive: ArchiveReader,
    /// The cloud catalog source.
    cloud: CloudSource,
    /// The aggregate listing across all origins. None until computed; an
    /// empty listing is a real result and is cached like any other.
    listing: RwLock<Option<Vec<String>>>,
}

impl Resolver {
    /// Creates a new resolver, creating the music and scratch directories if
    /// needed.
    pub fn new(
        music_dir: PathBuf,
        store: Arc<dyn Store>,
        fetcher: Arc<dyn CatalogFetcher>,
        cloud_prefix: String,
        catalog_ttl: Duration,
    ) -> Result<Resolver, Box<dyn Error>> {
        let tmp_dir = music_dir.join(TMP_SUBDIR);
        fs::create_dir_all(&tmp_dir)?;

        Ok(Resolver {
            music_dir,
            tmp_dir: tmp_dir.clone(),
            cloud_prefix: cloud_prefix.clone(),
            archive: ArchiveReader::new(Arc::clone(&store)),
            cloud: CloudSource::new(store, fetcher, cloud_prefix, catalog_ttl, tmp_dir),
            listing: RwLock::new(None),
        })
    }

    /// Lists every known identifier: loose files, then archive entries
    /// archive by archive, then cloud entries in catalog order. The result is
    /// cached until the cache is invalidated. The cloud portion comes from
    /// the cached catalog only; no fetch is triggered.
    pub async fn list_all(&self) -> Result<Vec<String>, Box<dyn Error>> {
        if let Some(listing) = self.listing.read().clone() {
            return Ok(listing);
        }

        let mut listing = self.list_loose_files()?;
        for archive_name in self.list_archives()? {
            let entries = self
                .archive
                .list_music_entries(&self.music_dir.join(&archive_name))?;
            listing.extend(
                entries
                    .into_iter()
                    .map(|entry| format!("{}/{}", archive_name, entry)),
            );
        }
        listing.extend(self.cloud.list_known_entries());

        info!(identifiers = listing.len(), "Computed music listing.");
        *self.listing.write() = Some(listing.clone());
        Ok(listing)
    }

    /// Resolves an identifier to a concrete local path. Loose files resolve
    /// to their path in the music directory without an existence check;
    /// archive entries are extracted to the scratch directory; cloud entries
    /// resolve only if already materialized. None means the entry wasn't
    /// found where its identifier claims it lives.
    pub async fn resolve(&self, identifier: &str) -> Result<Option<PathBuf>, Box<dyn Error>> {
        match super::classify(identifier, &self.cloud_prefix) {
            Origin::File => Ok(Some(self.music_dir.join(identifier))),
            Origin::Archive { archive, entry } => Ok(self.archive.extract_entry(
                &self.music_dir.join(archive),
                entry,
                &self.tmp_dir,
            )?),
            Origin::Cloud { .. } => Ok(self.cloud.load_from_cache(identifier)),
        }
    }

    /// Drops the cached aggregate listing so the next listing recomputes.
    pub fn invalidate_listing(&self) {
        debug!("Invalidating music listing cache.");
        *self.listing.write() = None;
    }

    /// Removes every temporary extraction and recreates the empty scratch
    /// directory.
    pub fn clear_temporary(&self) -> Result<(), io::Error> {
        info!("Clearing temporary extractions.");
        match fs::remove_dir_all(&self.tmp_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.tmp_dir)
    }

    /// The cloud source, for catalog refresh and entry materialization.
    pub fn cloud(&self) -> &CloudSource {
        &self.cloud
    }

    /// Music files directly inside the music directory, sorted by name.
    fn list_loose_files(&self) -> Result<Vec<String>, io::Error> {
        let mut files = self.directory_entries(|name| formats::is_music_file(name))?;
        files.sort();
        Ok(files)
    }

    /// Zip archives directly inside the music directory, sorted by name.
    fn list_archives(&self) -> Result<Vec<String>, io::Error> {
        let mut archives = self.directory_entries(|name| name.ends_with(".zip"))?;
        archives.sort();
        Ok(archives)
    }

    /// Names of regular files in the music directory matching the filter.
    fn directory_entries<F>(&self, filter: F) -> Result<Vec<String>, io::Error>
    where
        F: Fn(&str) -> bool,
    {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.music_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if filter(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::cloud::{CatalogEntry, CatalogFetcher};
    use super::super::mock;
    use super::Resolver;
    use crate::store::FileStore;
    use crate::testutil::write_raw_zip;

    fn test_resolver(
        dir: &std::path::Path,
    ) -> Result<(Resolver, Arc<mock::Fetcher>), Box<dyn Error>> {
        let music_dir = dir.join("music");
        fs::create_dir_all(&music_dir)?;
        let store = Arc::new(FileStore::new(dir.join("state"))?);
        let fetcher = Arc::new(mock::Fetcher::get("mock"));
        fetcher.set_entries(vec![CatalogEntry {
            id: "7".to_string(),
            name: "remote".to_string(),
        }]);
        let resolver = Resolver::new(
            music_dir,
            store,
            Arc::clone(&fetcher) as Arc<dyn CatalogFetcher>,
            "cloud:catalog".to_string(),
            Duration::from_secs(3600),
        )?;
        Ok((resolver, fetcher))
    }

    #[tokio::test]
    async fn test_list_all_ordering() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (resolver, _) = test_resolver(tempdir.path())?;
        let music_dir = tempdir.path().join("music");

        fs::write(music_dir.join("b.mid"), b"")?;
        fs::write(music_dir.join("a.mid"), b"")?;
        fs::write(music_dir.join("notes.txt"), b"")?;
        write_raw_zip(
            &music_dir.join("pack.zip"),
            &[(b"inner.mid".to_vec(), b"MThd".to_vec())],
        )?;
        resolver.cloud().refresh_catalog(true).await?;

        assert_eq!(
            vec![
                "a.mid",
                "b.mid",
                "pack.zip/inner.mid",
                "cloud:catalog/remote.json"
            ],
            resolver.list_all().await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_listing_cache() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (resolver, _) = test_resolver(tempdir.path())?;
        let music_dir = tempdir.path().join("music");

        fs::write(music_dir.join("first.mid"), b"")?;
        assert_eq!(vec!["first.mid"], resolver.list_all().await?);

        // New files don't show up until the cache is invalidated.
        fs::write(music_dir.join("second.mid"), b"")?;
        assert_eq!(vec!["first.mid"], resolver.list_all().await?);

        resolver.invalidate_listing();
        assert_eq!(
            vec!["first.mid", "second.mid"],
            resolver.list_all().await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_listing_is_cached() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (resolver, _) = test_resolver(tempdir.path())?;
        let music_dir = tempdir.path().join("music");

        assert!(resolver.list_all().await?.is_empty());

        // An empty listing is a real result, not an uncomputed one.
        fs::write(music_dir.join("late.mid"), b"")?;
        assert!(resolver.list_all().await?.is_empty());

        resolver.invalidate_listing();
        assert_eq!(vec!["late.mid"], resolver.list_all().await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_origins() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (resolver, fetcher) = test_resolver(tempdir.path())?;
        let music_dir = tempdir.path().join("music");

        // Loose files resolve without an existence check.
        assert_eq!(
            Some(music_dir.join("loose.mid")),
            resolver.resolve("loose.mid").await?
        );

        // Archive entries are extracted to the scratch directory.
        write_raw_zip(
            &music_dir.join("pack.zip"),
            &[(b"inner.mid".to_vec(), b"MThd-bytes".to_vec())],
        )?;
        let extracted = resolver
            .resolve("pack.zip/inner.mid")
            .await?
            .expect("archive entry should resolve");
        assert!(extracted.starts_with(music_dir.join("tmp")));
        assert_eq!(b"MThd-bytes".to_vec(), fs::read(&extracted)?);
        assert!(resolver.resolve("pack.zip/absent.mid").await?.is_none());

        // Cloud entries resolve only once materialized.
        resolver.cloud().refresh_catalog(true).await?;
        fetcher.set_payload("7", b"{}".to_vec());
        let identifier = "cloud:catalog/remote.json";
        assert!(resolver.resolve(identifier).await?.is_none());
        assert!(resolver.cloud().materialize_entry(identifier).await?);
        let materialized = resolver
            .resolve(identifier)
            .await?
            .expect("materialized entry should resolve");
        assert_eq!(b"{}".to_vec(), fs::read(&materialized)?);

        Ok(())
    }

    #[tokio::test]
    async fn test_clear_temporary() -> Result<(), Box<dyn Error>> {
        let tempdir = tempfile::tempdir()?;
        let (resolver, _) = test_resolver(tempdir.path())?;
        let music_dir = tempdir.path().join("music");

        write_raw_zip(
            &music_dir.join("pack.zip"),
            &[(b"inner.mid".to_vec(), b"MThd".to_vec())],
        )?;
        let extracted = resolver
            .resolve("pack.zip/inner.mid")
            .await?
            .expect("archive entry should resolve");
        assert!(extracted.exists());

        resolver.clear_temporary()?;
        assert!(!extracted.exists());
        assert!(music_dir.join("tmp").exists());

        Ok(())
    }
}
