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
use std::io;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::Store;

/// The store key holding every user music list.
const LISTS_KEY: &str = "user_music_lists";

/// The list created when no lists exist yet.
const DEFAULT_LIST_NAME: &str = "collection";

/// A named list of music identifiers.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MusicList {
    /// The name of the list.
    pub name: String,
    /// The music identifiers in the list, in insertion order.
    pub music_files: Vec<String>,
}

/// User music lists, persisted through the store. Mutations return false when
/// rejected (duplicate names, duplicate entries, unknown lists) and persist
/// immediately when accepted.
pub struct Playlists {
    store: Arc<dyn Store>,
    lists: RwLock<Vec<MusicList>>,
}

impl Playlists {
    /// Loads the lists from the store, seeding a single default list the
    /// first time around.
    pub fn new(store: Arc<dyn Store>) -> Result<Playlists, io::Error> {
        let lists = match store.get(LISTS_KEY) {
            Some(value) => match serde_json::from_value(value) {
                Ok(lists) => lists,
                Err(e) => {
                    warn!(
                        err = e.to_string(),
                        "Stored music lists are unreadable, starting over."
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let playlists = Playlists {
            store,
            lists: RwLock::new(lists),
        };
        if playlists.lists.read().is_empty() {
            playlists.lists.write().push(MusicList {
                name: DEFAULT_LIST_NAME.to_string(),
                music_files: Vec::new(),
            });
        }
        playlists.save()?;
        Ok(playlists)
    }

    /// Creates a new empty list. False if a list with the name exists.
    pub fn create(&self, name: &str) -> Result<bool, io::Error> {
        {
            let mut lists = self.lists.write();
            if lists.iter().any(|list| list.name == name) {
                return Ok(false);
            }
            lists.push(MusicList {
                name: name.to_string(),
                music_files: Vec::new(),
            });
        }
        self.save()?;
        Ok(true)
    }

    /// Deletes a list. False if no list has the name.
    pub fn delete(&self, name: &str) -> Result<bool, io::Error> {
        {
            let mut lists = self.lists.write();
            let before = lists.len();
            lists.retain(|list| list.name != name);
            if lists.len() == before {
                return Ok(false);
            }
        }
        self.save()?;
        Ok(true)
    }

    /// Renames a list. False if the old name is unknown or the new name is
    /// taken.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<bool, io::Error> {
        {
            let mut lists = self.lists.write();
            if lists.iter().any(|list| list.name == new_name) {
                return Ok(false);
            }
            match lists.iter_mut().find(|list| list.name == old_name) {
                Some(list) => list.name = new_name.to_string(),
                None => return Ok(false),
            }
        }
        self.save()?;
        Ok(true)
    }

    /// Adds a music identifier to a list. False if the list is unknown or
    /// already contains the identifier.
    pub fn add(&self, list_name: &str, music_file: &str) -> Result<bool, io::Error> {
        {
            let mut lists = self.lists.write();
            match lists.iter_mut().find(|list| list.name == list_name) {
                Some(list) => {
                    if list.music_files.iter().any(|file| file == music_file) {
                        return Ok(false);
                    }
                    list.music_files.push(music_file.to_string());
                }
                None => return Ok(false),
            }
        }
        self.save()?;
        Ok(true)
    }

    /// Removes a music identifier from a list. False if the list is unknown
    /// or doesn't contain the identifier.
    pub fn remove(&self, list_name: &str, music_file: &str) -> Result<bool, io::Error> {
        {
            let mut lists = self.lists.write();
            match lists.iter_mut().find(|list| list.name == list_name) {
                Some(list) => {
                    let before = list.music_files.len();
                    list.music_files.retain(|file| file != music_file);
                    if list.music_files.len() == before {
                        return Ok(false);
                    }
                }
                None => return Ok(false),
            }
        }
        self.save()?;
        Ok(true)
    }

    /// The names of every list.
    pub fn names(&self) -> Vec<String> {
        self.lists.read().iter().map(|list| list.name.clone()).collect()
    }

    /// A snapshot of the named list, or None if it doesn't exist.
    pub fn get(&self, name: &str) -> Option<MusicList> {
        self.lists
            .read()
            .iter()
            .find(|list| list.name == name)
            .cloned()
    }

    /// The music identifiers in the named list, or None if it doesn't exist.
    pub fn music_in_list(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).map(|list| list.music_files)
    }

    /// Persists the current lists to the store.
    fn save(&self) -> Result<(), io::Error> {
        let serialized = serde_json::to_value(&*self.lists.read())?;
        self.store.set(LISTS_KEY, &serialized)
    }
}
