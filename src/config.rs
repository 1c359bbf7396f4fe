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
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File};
use duration_string::DurationString;
use serde::{Deserialize, Serialize};

use crate::source;

/// The catalog TTL used when the settings file doesn't specify one.
const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Typed error for settings load/parse failures so callers can distinguish
/// e.g. file-not-found from parse errors without string matching.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings load/parse error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid catalog TTL: {0}")]
    InvalidTtl(duration_string::Error),
}

/// A YAML representation of the resolver settings.
#[derive(Deserialize, Serialize)]
pub struct Settings {
    /// The directory holding loose music files and archives.
    music_dir: String,
    /// The directory holding persisted state. Defaults to a subdirectory of
    /// the music directory.
    state_dir: Option<String>,
    /// The cloud catalog configuration.
    catalog: Option<Catalog>,
}

/// The cloud catalog configuration.
#[derive(Deserialize, Serialize)]
pub struct Catalog {
    /// The catalog fetcher to use.
    fetcher: String,
    /// How long a fetched catalog stays fresh, e.g. "24h".
    ttl: Option<String>,
    /// The identifier prefix marking cloud entries.
    prefix: Option<String>,
}

impl Settings {
    /// Deserializes a file from the path into a settings struct.
    pub fn deserialize(path: &Path) -> Result<Settings, SettingsError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Settings>()?)
    }

    /// Serialize and save the settings to a file at the given path.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        let serialized = serde_yml::to_string(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }

    /// Gets the music directory.
    pub fn music_dir(&self) -> PathBuf {
        PathBuf::from(&self.music_dir)
    }

    /// Gets the state directory.
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(state_dir) => PathBuf::from(state_dir),
            None => self.music_dir().join("state"),
        }
    }

    /// Gets the configured catalog fetcher name, if any.
    pub fn catalog_fetcher(&self) -> Option<&str> {
        self.catalog
            .as_ref()
            .map(|catalog| catalog.fetcher.as_str())
    }

    /// Gets the catalog TTL.
    pub fn catalog_ttl(&self) -> Result<Duration, SettingsError> {
        match self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.ttl.as_ref())
        {
            Some(ttl) => Ok(DurationString::from_string(ttl.clone())
                .map_err(SettingsError::InvalidTtl)?
                .into()),
            None => Ok(DEFAULT_CATALOG_TTL),
        }
    }

    /// Gets the identifier prefix for cloud entries.
    pub fn cloud_prefix(&self) -> String {
        self.catalog
            .as_ref()
            .and_then(|catalog| catalog.prefix.clone())
            .unwrap_or_else(|| source::DEFAULT_CLOUD_PREFIX.to_string())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            music_dir: "music".to_string(),
            state_dir: None,
            catalog: Some(Catalog {
                fetcher: "mock".to_string(),
                ttl: Some("24h".to_string()),
                prefix: None,
            }),
        }
    }
}
