//! Document storage behind a trait, so stages never touch the filesystem directly.
//!
//! Paths handed to a [DocumentStore] are corpus-root relative and `/`-separated. Writes replace
//! the whole document or nothing.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use walkdir::{DirEntry, WalkDir};

use crate::{
    error::LaminaError,
    paths::{extension, normalize, os_path_to_string, string_to_os_path},
};

/// Extensions recognized as corpus documents.
pub const DOCUMENT_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

pub trait DocumentStore {
    /// Read a document. `Ok(None)` when it does not exist.
    fn read(&self, path: &str) -> Result<Option<String>, LaminaError>;

    fn exists(&self, path: &str) -> bool;

    /// All documents with a recognized extension under `dir`, recursively, sorted by path.
    fn list(&self, dir: &str) -> Result<Vec<String>, LaminaError>;

    /// Replace a document in one step.
    fn write(&mut self, path: &str, content: &str) -> Result<(), LaminaError>;
}

fn is_document(path: &str) -> bool {
    DOCUMENT_EXTENSIONS.contains(&extension(path))
}

/// A corpus rooted at a filesystem directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<FsStore, LaminaError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(LaminaError::Fatal(format!(
                "corpus root {root:?} is not a readable directory"
            )));
        }
        Ok(FsStore {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(string_to_os_path(&normalize(path)))
    }
}

impl DocumentStore for FsStore {
    fn read(&self, path: &str) -> Result<Option<String>, LaminaError> {
        let full = self.full_path(path);
        if !full.is_file() {
            return Ok(None);
        }
        tracing::trace!("Reading {:?}", full);
        Ok(Some(fs::read_to_string(full)?))
    }

    fn exists(&self, path: &str) -> bool {
        self.full_path(path).is_file()
    }

    fn list(&self, dir: &str) -> Result<Vec<String>, LaminaError> {
        fn is_hidden(entry: &DirEntry) -> bool {
            entry
                .file_name()
                .to_str()
                .map(|s| s.starts_with('.'))
                .unwrap_or(false)
        }
        let start = self.full_path(dir);
        if !start.is_dir() {
            tracing::debug!("{:?} does not exist, nothing to list", start);
            return Ok(Vec::new());
        }
        let mut docs = Vec::new();
        for entry in WalkDir::new(&start)
            .into_iter()
            .filter_entry(|e| !is_hidden(e) || e.path() == start)
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = os_path_to_string(entry.path().strip_prefix(&self.root)?);
            if is_document(&relative) {
                docs.push(relative);
            }
        }
        docs.sort();
        Ok(docs)
    }

    fn write(&mut self, path: &str, content: &str) -> Result<(), LaminaError> {
        let full = self.full_path(path);
        let dir = full
            .parent()
            .ok_or_else(|| LaminaError::Io(format!("{full:?} has no parent directory")))?;
        fs::create_dir_all(dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&full)?;
        tracing::debug!("Wrote {:?}", full);
        Ok(())
    }
}

/// An in-memory corpus, used by tests and benchmarks.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    docs: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn with<S: Into<String>>(mut self, path: &str, content: S) -> MemoryStore {
        self.docs.insert(normalize(path), content.into());
        self
    }

    pub fn documents(&self) -> &BTreeMap<String, String> {
        &self.docs
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, path: &str) -> Result<Option<String>, LaminaError> {
        Ok(self.docs.get(&normalize(path)).cloned())
    }

    fn exists(&self, path: &str) -> bool {
        self.docs.contains_key(&normalize(path))
    }

    fn list(&self, dir: &str) -> Result<Vec<String>, LaminaError> {
        let dir = normalize(dir);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        Ok(self
            .docs
            .keys()
            .filter(|p| p.starts_with(&prefix) && is_document(p))
            .cloned()
            .collect())
    }

    fn write(&mut self, path: &str, content: &str) -> Result<(), LaminaError> {
        self.docs.insert(normalize(path), content.to_string());
        Ok(())
    }
}
