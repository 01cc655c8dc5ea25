use std::{fmt, io, path::StripPrefixError};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum LaminaError {
    #[error("Lamina codec error: {0}")]
    Codec(String),
    #[error("Invalid Command: {0}")]
    Command(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Fatal corpus error: {0}")]
    Fatal(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl From<StripPrefixError> for LaminaError {
    fn from(src: StripPrefixError) -> LaminaError {
        LaminaError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for LaminaError {
    fn from(src: toml::de::Error) -> LaminaError {
        LaminaError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for LaminaError {
    fn from(src: toml::ser::Error) -> LaminaError {
        LaminaError::Config(format!("Toml serialization error: {src}"))
    }
}

impl From<YamlError> for LaminaError {
    fn from(src: YamlError) -> LaminaError {
        LaminaError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<JsonError> for LaminaError {
    fn from(src: JsonError) -> LaminaError {
        LaminaError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for LaminaError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => LaminaError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => LaminaError::PermissionDenied,
            _ => LaminaError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<walkdir::Error> for LaminaError {
    fn from(x: walkdir::Error) -> Self {
        match x.io_error().map(|e| e.kind()) {
            Some(io::ErrorKind::NotFound) => LaminaError::NotFound(format!("{x}")),
            Some(io::ErrorKind::PermissionDenied) => LaminaError::PermissionDenied,
            _ => LaminaError::Io(format!("directory walk failed: {x}")),
        }
    }
}

impl From<tempfile::PersistError> for LaminaError {
    fn from(x: tempfile::PersistError) -> Self {
        LaminaError::Io(format!(
            "failed to persist {:?}: {}",
            x.file.path(),
            x.error.kind()
        ))
    }
}

impl From<fmt::Error> for LaminaError {
    fn from(x: fmt::Error) -> Self {
        LaminaError::Codec(format!("{x}"))
    }
}

impl From<RegexError> for LaminaError {
    fn from(x: RegexError) -> Self {
        LaminaError::Serialization(format!("Regex parse failed: {x}"))
    }
}
