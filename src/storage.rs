//! # Statistics Persistence
//!
//! Keeps the statistics of a rainfall in progress on disk so a reboot in the
//! middle of a rainfall resumes it instead of starting from zero.
//!
//! ## Storage Strategy
//! - **Format**: JSON serialization of [`StatisticsSnapshot`], a few dozen bytes
//! - **When**: written after every evaluation of an active rainfall, removed
//!   when the rainfall ends
//! - **Atomicity**: written to a sibling temp file and renamed over the
//!   snapshot, so a power cut never leaves a half-written record
//!
//! A missing snapshot is not an error: it simply means no rainfall was in
//! progress.

use crate::StatisticsSnapshot;
use std::{fs, io, path::Path};
use thiserror::Error;

/// Errors that can occur while persisting statistics.
#[derive(Error, Debug)]
pub enum StorageError {
    /// File operations failed (permissions, disk space)
    #[error("snapshot IO: {0}")]
    Io(#[from] io::Error),

    /// The file does not hold a valid snapshot
    #[error("snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load a snapshot, `Ok(None)` if none was saved.
pub fn load(path: &Path) -> Result<Option<StatisticsSnapshot>, StorageError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Save a snapshot, replacing any previous one.
pub fn save(path: &Path, snapshot: &StatisticsSnapshot) -> Result<(), StorageError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let data = serde_json::to_vec(snapshot)?;
    let staging = path.with_extension("tmp");
    fs::write(&staging, data)?;
    fs::rename(&staging, path)?;
    Ok(())
}

/// Remove the snapshot; removing a missing one succeeds.
pub fn clear(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
