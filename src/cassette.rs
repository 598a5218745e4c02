//! Record/replay cassette for raw shell output
//!
//! Maps literal command text to the raw bytes the shell produced for it
//! (echo, output and trailing prompt), so a session can be replayed
//! deterministically in tests without touching a real shell.
//!
//! # File format
//!
//! ```toml
//! [[entries]]
//! command = "ls Makefile"
//! output = "ls Makefile\r\nMakefile\r\nzamm$ "
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CassetteError {
    #[error("Failed to access cassette {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse cassette {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize cassette: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A single recorded interaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CassetteEntry {
    pub command: String,
    pub output: String,
}

#[derive(Default, Serialize, Deserialize)]
struct CassetteFile {
    #[serde(default)]
    entries: Vec<CassetteEntry>,
}

/// Command output cache, optionally persisted to a file
#[derive(Debug, Default)]
pub struct Cassette {
    entries: BTreeMap<String, String>,
    file_path: Option<PathBuf>,
}

impl Cassette {
    /// An empty cassette that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load a cassette from `path`. A missing file is an empty cassette.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CassetteError> {
        let path = path.as_ref().to_path_buf();
        let mut cassette = Self {
            entries: BTreeMap::new(),
            file_path: Some(path.clone()),
        };

        if !path.exists() {
            return Ok(cassette);
        }

        let content = fs::read_to_string(&path).map_err(|source| CassetteError::Io {
            path: path.clone(),
            source,
        })?;
        let file: CassetteFile = toml::from_str(&content).map_err(|source| CassetteError::Parse {
            path: path.clone(),
            source,
        })?;

        for entry in file.entries {
            cassette.entries.insert(entry.command, entry.output);
        }
        tracing::debug!("Loaded {} cassette entries from {}", cassette.len(), path.display());
        Ok(cassette)
    }

    /// Recorded raw output for `command`
    pub fn get(&self, command: &str) -> Option<&str> {
        self.entries.get(command).map(String::as_str)
    }

    /// Record raw output for `command`, replacing any earlier entry
    pub fn record(&mut self, command: &str, output: &str) -> Result<(), CassetteError> {
        self.entries.insert(command.to_string(), output.to_string());
        self.save()
    }

    /// Write the cassette to its file, if it has one
    pub fn save(&self) -> Result<(), CassetteError> {
        let Some(ref path) = self.file_path else {
            return Ok(());
        };

        let file = CassetteFile {
            entries: self
                .entries
                .iter()
                .map(|(command, output)| CassetteEntry {
                    command: command.clone(),
                    output: output.clone(),
                })
                .collect(),
        };
        let content = toml::to_string_pretty(&file)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CassetteError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| CassetteError::Io {
            path: path.clone(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
