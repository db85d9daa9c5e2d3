// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resumable-state persistence. Long pipeline runs write a small JSON
//! document after every unit of work so an interrupted run picks up where it
//! left off instead of starting over.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Bump this when a checkpoint schema changes shape; stale files are then
/// rejected rather than misread.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Could not read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse checkpoint {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Could not write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not serialise checkpoint {path}: {source}")]
    Serialise {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(
        "Checkpoint {path} was written by an incompatible version (found schema {found}, expected {expected}); delete it to start fresh"
    )]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

/// A checkpoint document that carries its own schema version.
pub trait Versioned {
    fn version(&self) -> u32;
}

/// Reads and writes checkpoint documents in a fixed directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> CheckpointStore {
        CheckpointStore { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read a checkpoint, or `Ok(None)` if it has never been written.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, CheckpointError> {
        let path = self.path(name);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::Read { path, source }),
        };
        let value = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| CheckpointError::Parse { path, source })?;
        Ok(Some(value))
    }

    /// Read a checkpoint and reject it if its schema version is not
    /// [`CHECKPOINT_VERSION`].
    pub fn read_versioned<T: DeserializeOwned + Versioned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, CheckpointError> {
        match self.read::<T>(name)? {
            None => Ok(None),
            Some(value) => {
                if value.version() != CHECKPOINT_VERSION {
                    return Err(CheckpointError::VersionMismatch {
                        path: self.path(name),
                        found: value.version(),
                        expected: CHECKPOINT_VERSION,
                    });
                }
                Ok(Some(value))
            }
        }
    }

    /// Write a checkpoint atomically: serialise to a sibling temp file, then
    /// rename it over the target so a crash never leaves a half-written file.
    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), CheckpointError> {
        let path = self.path(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        {
            let file = File::create(&tmp).map_err(|source| CheckpointError::Write {
                path: tmp.clone(),
                source,
            })?;
            serde_json::to_writer(BufWriter::new(file), value).map_err(|source| {
                CheckpointError::Serialise {
                    path: tmp.clone(),
                    source,
                }
            })?;
        }
        std::fs::rename(&tmp, &path)
            .map_err(|source| CheckpointError::Write { path, source })?;
        debug!("Wrote checkpoint {name}");
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), CheckpointError> {
        let path = self.path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Write { path, source }),
        }
    }
}

impl AsRef<Path> for CheckpointStore {
    fn as_ref(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use tempfile::tempdir;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: u32,
        cursor: usize,
    }

    impl Versioned for Doc {
        fn version(&self) -> u32 {
            self.version
        }
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let read: Option<Doc> = store.read("absent.json").unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let doc = Doc {
            version: CHECKPOINT_VERSION,
            cursor: 17,
        };
        store.write("state.json", &doc).unwrap();
        let read: Doc = store.read_versioned("state.json").unwrap().unwrap();
        assert_eq!(read, doc);
        // No temp file is left behind.
        assert!(!store.path(".state.json.tmp").exists());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let doc = Doc {
            version: CHECKPOINT_VERSION + 1,
            cursor: 0,
        };
        store.write("state.json", &doc).unwrap();
        assert!(matches!(
            store.read_versioned::<Doc>("state.json"),
            Err(CheckpointError::VersionMismatch { found, expected, .. })
                if found == CHECKPOINT_VERSION + 1 && expected == CHECKPOINT_VERSION
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .write(
                "state.json",
                &Doc {
                    version: 1,
                    cursor: 0,
                },
            )
            .unwrap();
        store.remove("state.json").unwrap();
        store.remove("state.json").unwrap();
        assert!(!store.path("state.json").exists());
    }
}
