//! Destinations for rendered invite documents.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BookingError, Result};

/// Somewhere rendered invites can be written.
pub trait InviteSink {
    /// Store `document` under `file_name` and return a reference to it
    /// (a path, key, or URL, depending on the sink).
    ///
    /// Existing artifacts are never overwritten.
    fn write(&mut self, file_name: &str, document: &str) -> Result<String>;
}

/// Writes each invite as a file in one output directory.
///
/// Files are written to a temporary name, synced, then renamed into place, so
/// a reader never sees a half-written invite.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl InviteSink for DirectorySink {
    fn write(&mut self, file_name: &str, document: &str) -> Result<String> {
        let target = self.dir.join(file_name);
        if target.exists() {
            return Err(BookingError::ArtifactExists(target));
        }

        fs::create_dir_all(&self.dir).map_err(|e| {
            BookingError::storage(format!("creating output dir {}", self.dir.display()), e)
        })?;

        let tmp = self.dir.join(format!(".{}.tmp", file_name));
        write_synced(&tmp, document)
            .and_then(|()| fs::rename(&tmp, &target))
            .map_err(|e| {
                let _ = fs::remove_file(&tmp);
                BookingError::storage(format!("writing invite {}", target.display()), e)
            })?;

        debug!(path = %target.display(), "invite written");
        Ok(target.display().to_string())
    }
}

fn write_synced(path: &Path, content: &str) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

/// Keeps invites in memory, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    documents: BTreeMap<String, String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> &BTreeMap<String, String> {
        &self.documents
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.documents.get(file_name).map(String::as_str)
    }
}

impl InviteSink for MemorySink {
    fn write(&mut self, file_name: &str, document: &str) -> Result<String> {
        if self.documents.contains_key(file_name) {
            return Err(BookingError::ArtifactExists(PathBuf::from(file_name)));
        }
        self.documents
            .insert(file_name.to_string(), document.to_string());
        Ok(format!("memory://{}", file_name))
    }
}
