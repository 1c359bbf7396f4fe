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
mod config;
mod formats;
mod midi;
mod playlist;
mod source;
mod store;
#[cfg(test)]
mod testutil;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};

use crate::config::Settings;
use crate::playlist::Playlists;
use crate::source::resolver::Resolver;
use crate::source::Origin;
use crate::store::FileStore;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A music source resolver and MIDI note extractor."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Writes a default settings file to the given path.
    Init {
        /// Where to write the settings file.
        path: String,
    },
    /// Lists every known music identifier across all origins.
    List {
        /// The path to the settings file.
        settings_path: String,
    },
    /// Resolves an identifier to a local file path, fetching cloud entries
    /// on demand.
    Load {
        /// The path to the settings file.
        settings_path: String,
        /// The identifier to resolve.
        identifier: String,
    },
    /// Refreshes the cloud catalog.
    Refresh {
        /// The path to the settings file.
        settings_path: String,
        /// Refresh even if the cached catalog is still fresh.
        #[arg(short, long)]
        force: bool,
    },
    /// Reconstructs the note timeline of a MIDI file and prints a per-track
    /// summary.
    Tracks {
        /// The path to the MIDI file.
        file: String,
        /// Print the full reconstruction as JSON instead of a summary.
        #[arg(short, long)]
        json: bool,
    },
    /// Removes every temporary extraction.
    ClearCache {
        /// The path to the settings file.
        settings_path: String,
    },
    /// Lists the user playlists and their contents.
    Playlists {
        /// The path to the settings file.
        settings_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            let path = PathBuf::from(path);
            Settings::default().save(&path)?;
            println!("Wrote default settings to {}.", path.display());
        }
        Commands::List { settings_path } => {
            let settings = load_settings(&settings_path)?;
            let resolver = build_resolver(&settings)?;
            let identifiers = resolver.list_all().await?;

            if identifiers.is_empty() {
                println!("No music found in {}.", settings.music_dir().display());
                return Ok(());
            }

            println!("Music (count: {}):", identifiers.len());
            for identifier in identifiers {
                println!("- {}", identifier);
            }
        }
        Commands::Load {
            settings_path,
            identifier,
        } => {
            let settings = load_settings(&settings_path)?;
            let resolver = build_resolver(&settings)?;

            // Cloud entries are fetched on demand; other origins resolve
            // directly.
            if let Origin::Cloud { .. } = source::classify(&identifier, &settings.cloud_prefix()) {
                if resolver.cloud().load_from_cache(&identifier).is_none() {
                    resolver.cloud().refresh_catalog(false).await?;
                    resolver.cloud().materialize_entry(&identifier).await?;
                }
            }

            match resolver.resolve(&identifier).await? {
                Some(path) => println!("{}", path.display()),
                None => println!("{} was not found.", identifier),
            }
        }
        Commands::Refresh {
            settings_path,
            force,
        } => {
            let settings = load_settings(&settings_path)?;
            let resolver = build_resolver(&settings)?;

            if resolver.cloud().refresh_catalog(force).await? {
                println!("Catalog refreshed.");
            } else {
                println!("Catalog is still fresh, skipped.");
            }
        }
        Commands::Tracks { file, json } => {
            let data = midi::parse(Path::new(&file))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            println!("Tracks (count: {}):", data.track_count());
            for track in data.tracks.iter() {
                println!(
                    "- Track {} ({}): channel {}, instrument {}, notes {}",
                    track.track_index,
                    if track.name.is_empty() {
                        "unnamed"
                    } else {
                        &track.name
                    },
                    track.channel,
                    track.instrument_id,
                    track.note_count,
                );
            }
        }
        Commands::ClearCache { settings_path } => {
            let settings = load_settings(&settings_path)?;
            let resolver = build_resolver(&settings)?;
            resolver.clear_temporary()?;
            println!("Cleared temporary extractions.");
        }
        Commands::Playlists { settings_path } => {
            let settings = load_settings(&settings_path)?;
            let store = Arc::new(FileStore::new(settings.state_dir())?);
            let playlists = Playlists::new(store)?;

            for name in playlists.names() {
                let music_files = playlists.music_in_list(&name).unwrap_or_default();
                println!("{} ({} songs):", name, music_files.len());
                for music_file in music_files {
                    println!("- {}", music_file);
                }
            }
        }
    }

    Ok(())
}

/// Loads the settings file.
fn load_settings(path: &str) -> Result<Settings, Box<dyn Error>> {
    Ok(Settings::deserialize(Path::new(path))?)
}

/// Builds a resolver from the settings.
fn build_resolver(settings: &Settings) -> Result<Resolver, Box<dyn Error>> {
    let store = Arc::new(FileStore::new(settings.state_dir())?);
    let fetcher = source::cloud::get_fetcher(settings.catalog_fetcher().unwrap_or("mock"))?;
    Resolver::new(
        settings.music_dir(),
        store,
        fetcher,
        settings.cloud_prefix(),
        settings.catalog_ttl()?,
    )
}
