//! Forward-slash path arithmetic for corpus documents.
//!
//! Every document in a corpus is addressed by a path relative to the corpus root, always using
//! `/` as the separator regardless of host OS. Manifest pointers are resolved against the
//! directory of the manifest that holds them, never against the corpus root, so manifests can be
//! relocated together with their targets.

use std::{
    borrow::Cow,
    path::{Component, Path, PathBuf, MAIN_SEPARATOR_STR},
};

/// Utility function to replace separators and convert to unicode (via to_string_lossy) on os path.
pub fn os_path_to_string<P: AsRef<Path>>(os_path_ref: P) -> String {
    let res = os_path_ref
        .as_ref()
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| match c {
            Component::RootDir => Cow::from("".to_string()),
            _ => c.as_os_str().to_string_lossy(),
        })
        .collect::<Vec<_>>()
        .join("/");
    tracing::trace!(
        "os_path_to_string: turned {:?} into {}",
        os_path_ref.as_ref(),
        res
    );
    res
}

pub fn string_to_os_path(path_string: &str) -> PathBuf {
    PathBuf::from(path_string.replace('/', MAIN_SEPARATOR_STR))
}

/// Directory part of a document path (`"a/b/c.yaml"` -> `"a/b"`, `"c.yaml"` -> `""`).
pub fn parent_dir(doc_path: &str) -> &str {
    match doc_path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &doc_path[..idx],
        None => "",
    }
}

/// File name without extension (`"records/add.yaml"` -> `"add"`).
pub fn file_stem(doc_path: &str) -> &str {
    let start = doc_path.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    let name = &doc_path[start..];
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Extension of a document path, without the leading dot.
pub fn extension(doc_path: &str) -> &str {
    let start = doc_path.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    let name = &doc_path[start..];
    match name.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &name[idx + 1..],
    }
}

/// Normalize a path by resolving `.` and `..` components.
///
/// Preserves leading `..` components that backtrack past the start of a relative path, so
/// callers can detect pointers that escape the corpus root.
pub fn normalize(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    let absolute = path.starts_with('/');
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match components.last() {
                Some(last) if *last != ".." => {
                    components.pop();
                }
                _ => {
                    if !absolute {
                        components.push("..");
                    }
                }
            },
            _ => components.push(part),
        }
    }
    let joined = components.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Resolve `pointer` relative to the directory containing the document at `from_doc`.
///
/// There is no corpus-global root: a leading `/` is dropped and the pointer is still resolved
/// against the referencing document's directory.
pub fn resolve(from_doc: &str, pointer: &str) -> String {
    let pointer = pointer.trim_start_matches('/');
    let base = parent_dir(from_doc);
    if base.is_empty() {
        normalize(pointer)
    } else {
        normalize(&format!("{base}/{pointer}"))
    }
}

/// Calculate the relative pointer a document at `from_doc` must hold to reach `to_doc`.
///
/// Both arguments are corpus-root relative paths.
pub fn path_to(from_doc: &str, to_doc: &str) -> String {
    let from_dir = normalize(parent_dir(from_doc));
    let to_norm = normalize(to_doc);
    let from_parts: Vec<&str> = from_dir.split('/').filter(|p| !p.is_empty()).collect();
    let to_parts: Vec<&str> = to_norm.split('/').filter(|p| !p.is_empty()).collect();

    let mut common_len = 0;
    for (from_part, to_part) in from_parts.iter().zip(to_parts.iter()) {
        if from_part == to_part {
            common_len += 1;
        } else {
            break;
        }
    }

    let mut result: Vec<&str> = Vec::new();
    for _ in common_len..from_parts.len() {
        result.push("..");
    }
    result.extend(to_parts[common_len..].iter());
    result.join("/")
}

/// Turn a grouping value into a file-name safe slug.
pub fn to_slug(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = true;
    for c in value.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
