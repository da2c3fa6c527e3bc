//! Persistent on-disk cache of fetched chapters and images.
//!
//! Layout: one `index.json` mapping `owner → name → data file`, plus one opaque data file per
//! entry. Data files are always written before the index that references them, and the index is
//! replaced atomically (temporary file + rename), so an interrupted run leaves a cache that the
//! next run can read. Deleting the directory is the supported way to invalidate everything.
//!
//! Single writer only: there is no locking, and every write rewrites the whole index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const INDEX_FILE_NAME: &str = "index.json";
const INDEX_TEMP_FILE_NAME: &str = "index.json.tmp";

/// Errors that the cache surfaces. Reads never fail; they degrade to a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cannot create cache directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot clear cache directory {path}: {source}")]
    Clear {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk index shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    #[serde(default)]
    owners: BTreeMap<String, BTreeMap<String, String>>,
}

/// Durable key/value store keyed by `(owner, name)`.
///
/// The owner is normally a story URL and the name a chapter or image key, so entries of
/// different stories never collide.
#[derive(Debug)]
pub struct Cache {
    directory: PathBuf,
    index: Index,
}

impl Cache {
    /// Open (or create) the cache in `directory`. A missing or unreadable index yields an empty
    /// cache.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| CacheError::CreateDirectory {
            path: directory.clone(),
            source: e,
        })?;
        let index = read_index(&directory.join(INDEX_FILE_NAME));
        Ok(Self { directory, index })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Total number of entries across all owners.
    pub fn len(&self) -> usize {
        self.index.owners.values().map(|items| items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries stored under `owner`.
    pub fn owner_len(&self, owner: &str) -> usize {
        self.index.owners.get(owner).map_or(0, |items| items.len())
    }

    pub fn contains_item(&self, owner: &str, name: &str) -> bool {
        self.index
            .owners
            .get(owner)
            .is_some_and(|items| items.contains_key(name))
    }

    /// Store `data` under `(owner, name)`, replacing any previous value.
    ///
    /// Empty owner, name or data is ignored so that failed extractions are never cached and get
    /// retried by the next run. I/O failures are logged and leave the previous state intact.
    pub fn add_item(&mut self, owner: &str, name: &str, data: impl AsRef<[u8]>) {
        let data = data.as_ref();
        if owner.is_empty() || name.is_empty() || data.is_empty() {
            return;
        }

        if let Some(old) = self.file_name(owner, name).map(str::to_owned) {
            if let Err(e) = std::fs::remove_file(self.directory.join(&old)) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cache: could not delete {}: {}", old, e);
                }
            }
            if let Some(items) = self.index.owners.get_mut(owner) {
                items.remove(name);
            }
        }

        let file_name = uuid::Uuid::new_v4().simple().to_string();
        if let Err(e) = std::fs::write(self.directory.join(&file_name), data) {
            warn!("Cache: could not write entry {:?}/{:?}: {}", owner, name, e);
            self.save_index();
            return;
        }

        self.index
            .owners
            .entry(owner.to_string())
            .or_default()
            .insert(name.to_string(), file_name);
        self.save_index();
    }

    /// Read the value stored under `(owner, name)`. Absent keys and read errors are both misses.
    pub fn retrieve_item(&self, owner: &str, name: &str) -> Option<Vec<u8>> {
        let file_name = self.file_name(owner, name)?;
        match std::fs::read(self.directory.join(file_name)) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!("Cache: miss on unreadable entry {:?}/{:?}: {}", owner, name, e);
                None
            }
        }
    }

    /// Like [retrieve_item](Self::retrieve_item) but decodes UTF-8 (lossily).
    pub fn retrieve_text(&self, owner: &str, name: &str) -> Option<String> {
        self.retrieve_item(owner, name)
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    /// Delete every entry: removes the directory and recreates it empty.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.index.owners.clear();
        match std::fs::remove_dir_all(&self.directory) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::Clear {
                    path: self.directory.clone(),
                    source: e,
                })
            }
        }
        std::fs::create_dir_all(&self.directory).map_err(|e| CacheError::Clear {
            path: self.directory.clone(),
            source: e,
        })
    }

    fn file_name(&self, owner: &str, name: &str) -> Option<&str> {
        self.index
            .owners
            .get(owner)
            .and_then(|items| items.get(name))
            .map(String::as_str)
    }

    fn save_index(&self) {
        let json = match serde_json::to_vec_pretty(&self.index) {
            Ok(j) => j,
            Err(e) => {
                warn!("Cache: could not serialize index: {}", e);
                return;
            }
        };
        let temp = self.directory.join(INDEX_TEMP_FILE_NAME);
        let result = std::fs::write(&temp, json)
            .and_then(|()| std::fs::rename(&temp, self.directory.join(INDEX_FILE_NAME)));
        if let Err(e) = result {
            warn!("Cache: could not write index in {}: {}", self.directory.display(), e);
        }
    }
}

fn read_index(path: &Path) -> Index {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return Index::default(),
    };
    match serde_json::from_slice(&bytes) {
        Ok(index) => index,
        Err(e) => {
            warn!("Cache: ignoring malformed index {}: {}", path.display(), e);
            Index::default()
        }
    }
}
