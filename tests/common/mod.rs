//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use lamina_core::{
    config::{ConfigProvider, TomlConfigProvider},
    corpus::RunContext,
    store::FsStore,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tempfile::{tempdir, TempDir};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

#[allow(dead_code)]
pub fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> io::Result<()> {
    fs::create_dir_all(&dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        if ty.is_dir() {
            copy_dir_all(entry.path(), dst.as_ref().join(entry.file_name()))?;
        } else {
            fs::copy(entry.path(), dst.as_ref().join(entry.file_name()))?;
        }
    }
    Ok(())
}

/// Copy the fixture corpus `tests/<name>` into a fresh temporary directory.
#[allow(dead_code)]
pub fn generate_test_root(name: &str) -> TempDir {
    let temp_dir = tempdir().unwrap();
    let content_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join(name);
    tracing::debug!("Copying content from {:?}", content_root);
    copy_dir_all(&content_root, temp_dir.path()).unwrap();
    temp_dir
}

/// Write a corpus document, creating parent directories.
#[allow(dead_code)]
pub fn write_doc(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[allow(dead_code)]
pub fn read_doc(root: &Path, rel: &str) -> Option<String> {
    fs::read_to_string(root.join(rel)).ok()
}

/// Load a run context over a filesystem corpus, with its `lamina.toml` if present.
#[allow(dead_code)]
pub fn load_context(root: &Path) -> RunContext {
    let config = TomlConfigProvider::for_corpus(root).load().unwrap();
    let store = FsStore::new(root).unwrap();
    RunContext::load(Box::new(store), config).unwrap()
}
