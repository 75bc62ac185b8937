// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Filesystem-based state store
//!
//! Stores one JSON document per dataset in a storage directory. Documents
//! are written to a temporary file and renamed into place, so a crash never
//! leaves a half-written snapshot behind.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::hash::hash_string;
use super::{DatasetState, StateStore, StateSummary, StoreStats};
use crate::errors::{LiveflowError, LiveflowResult, LOCK_FILE_NAME};

/// Filesystem-based state store
pub struct FilesystemStore {
    /// Storage directory
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a new filesystem store
    pub fn new(root: PathBuf) -> LiveflowResult<Self> {
        if !root.exists() {
            std::fs::create_dir_all(&root)
                .map_err(|e| LiveflowError::state_store("Failed to create storage directory", e))?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get path for a dataset's state document
    fn state_path(&self, dataset: &str) -> PathBuf {
        let key = hash_string(dataset);
        // Use first 2 chars as directory for better filesystem performance
        let (prefix, rest) = key.split_at(2);
        self.root.join(prefix).join(format!("{}.json", rest))
    }

    /// Take the cross-process run lock for this storage directory
    ///
    /// The lock file holds the owner's process id. A lock left behind by a
    /// process that no longer exists is reclaimed.
    pub fn lock(&self) -> LiveflowResult<RunLockGuard> {
        let path = self.root.join(LOCK_FILE_NAME);
        match create_lock(&path) {
            Err(LiveflowError::RunInProgress) if lock_is_stale(&path) => {
                tracing::warn!(path = %path.display(), "reclaiming run lock of a process that is gone");
                std::fs::remove_file(&path)
                    .map_err(|e| LiveflowError::state_store("Failed to remove stale run lock", e))?;
                create_lock(&path)
            }
            other => other,
        }
    }

    /// Read every state document
    async fn read_all(&self) -> LiveflowResult<Vec<DatasetState>> {
        let mut states = Vec::new();

        if !self.root.exists() {
            return Ok(states);
        }

        for prefix_dir in std::fs::read_dir(&self.root)
            .map_err(|e| LiveflowError::state_store("Failed to read storage directory", e))?
        {
            let prefix_dir = prefix_dir
                .map_err(|e| LiveflowError::state_store("Failed to read storage entry", e))?
                .path();

            if !prefix_dir.is_dir() {
                continue;
            }

            for entry in std::fs::read_dir(&prefix_dir)
                .map_err(|e| LiveflowError::state_store("Failed to read storage subdirectory", e))?
            {
                let path = entry
                    .map_err(|e| LiveflowError::state_store("Failed to read state file", e))?
                    .path();

                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| LiveflowError::state_store("Failed to read state file", e))?;
                match serde_json::from_str::<DatasetState>(&content) {
                    Ok(state) => states.push(state),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable state file")
                    }
                }
            }
        }

        states.sort_by(|a, b| a.dataset.cmp(&b.dataset));
        Ok(states)
    }

    /// Calculate directory size recursively
    fn dir_size(path: &Path) -> LiveflowResult<u64> {
        let mut size = 0;

        for entry in std::fs::read_dir(path)
            .map_err(|e| LiveflowError::state_store("Failed to read directory", e))?
        {
            let entry = entry.map_err(|e| LiveflowError::state_store("Failed to read entry", e))?;

            let path = entry.path();
            if path.is_dir() {
                size += Self::dir_size(&path)?;
            } else {
                size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        Ok(size)
    }
}

#[async_trait]
impl StateStore for FilesystemStore {
    async fn load(&self, dataset: &str) -> LiveflowResult<Option<DatasetState>> {
        let path = self.state_path(dataset);

        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| LiveflowError::state_store("Failed to read state", e))?;

        let state: DatasetState = serde_json::from_str(&content)
            .map_err(|e| LiveflowError::state_store("Failed to parse state", e))?;

        Ok(Some(state))
    }

    async fn store(&self, state: &DatasetState) -> LiveflowResult<()> {
        let path = self.state_path(&state.dataset);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LiveflowError::state_store("Failed to create state directory", e))?;
        }

        let json = serde_json::to_string(state)
            .map_err(|e| LiveflowError::state_store("Failed to serialize state", e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| LiveflowError::state_store("Failed to write state", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| LiveflowError::state_store("Failed to commit state", e))?;

        Ok(())
    }

    async fn reset(&self, dataset: &str) -> LiveflowResult<()> {
        let path = self.state_path(dataset);

        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| LiveflowError::state_store("Failed to remove state", e))?;
        }

        Ok(())
    }

    async fn clear(&self) -> LiveflowResult<()> {
        for state in self.read_all().await? {
            self.reset(&state.dataset).await?;
        }
        Ok(())
    }

    async fn list(&self) -> LiveflowResult<Vec<StateSummary>> {
        Ok(self.read_all().await?.iter().map(StateSummary::from).collect())
    }

    async fn stats(&self) -> LiveflowResult<StoreStats> {
        let summaries = self.list().await?;
        let mut stats = StoreStats::from_summaries(&summaries);

        if self.root.exists() {
            stats.size_bytes = Self::dir_size(&self.root)?;
        }

        Ok(stats)
    }
}

fn create_lock(path: &Path) -> LiveflowResult<RunLockGuard> {
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(LiveflowError::RunInProgress)
        }
        Err(e) => return Err(LiveflowError::state_store("Failed to create run lock", e)),
    };

    let guard = RunLockGuard {
        path: path.to_path_buf(),
    };
    writeln!(file, "{}", std::process::id())
        .map_err(|e| LiveflowError::state_store("Failed to write run lock", e))?;

    tracing::debug!(path = %path.display(), "acquired run lock");
    Ok(guard)
}

/// Whether a lock file names a process that is no longer running
///
/// Unreadable or empty lock files count as held.
fn lock_is_stale(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u32>().ok())
        .is_some_and(|pid| !process_alive(pid))
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Holds the run lock file; removes it on drop
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}
