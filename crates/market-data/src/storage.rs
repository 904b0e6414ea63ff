//! Fail-open JSON document persistence.
//!
//! Every file-backed structure in this crate goes through these helpers. A
//! missing, empty or unparsable file reads as "absent" so callers can
//! synthesize a fresh value instead of failing.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::MarketDataError;

/// Outcome of reading a persisted document.
#[derive(Debug)]
pub(crate) enum Loaded<T> {
    Present(T),
    Missing,
    /// The file exists but could not be read or parsed.
    Corrupt,
}

impl<T> Loaded<T> {
    pub(crate) fn into_option(self) -> Option<T> {
        match self {
            Loaded::Present(value) => Some(value),
            Loaded::Missing | Loaded::Corrupt => None,
        }
    }
}

pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Loaded<T> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Loaded::Missing,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return Loaded::Corrupt;
        }
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Loaded::Missing;
    }

    match serde_json::from_slice(&raw) {
        Ok(value) => Loaded::Present(value),
        Err(e) => {
            warn!("Discarding unparsable {}: {}", path.display(), e);
            Loaded::Corrupt
        }
    }
}

pub(crate) fn persist_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MarketDataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Delete `path`, ignoring a file that is already gone.
pub(crate) fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
