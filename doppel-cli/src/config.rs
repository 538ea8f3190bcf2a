// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job files
//!
//! ```toml
//! name = "photos"
//!
//! [compare]
//! variant = { kind = "time_and_size", tolerance_secs = 2 }
//!
//! [sync]
//! direction = { variant = "mirror" }
//! deletion = "recycle_bin"
//!
//! [[pair]]
//! left = "/home/me/Pictures"
//! right = "/media/me/backup/Pictures"
//! ```

use doppel_compare::{CompareOptions, FolderPairSpec};
use doppel_core::{AbstractPath, DoppelError, DoppelResult};
use doppel_providers::LockOptions;
use doppel_sync::{DeletionPolicy, DirectionConfig, ExecOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub compare: CompareOptions,
    pub sync: SyncSection,
    #[serde(rename = "pair")]
    pub pairs: Vec<PairConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    pub direction: DirectionConfig,
    #[serde(default)]
    pub deletion: DeletionPolicy,
    #[serde(default)]
    pub copy_permissions: bool,
    #[serde(default = "default_true")]
    pub use_locks: bool,
    /// Seconds to wait for a lock held by another run.
    #[serde(default)]
    pub lock_wait_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairConfig {
    pub left: String,
    pub right: String,
}

/// Job file used when none is given on the command line.
pub fn default_job_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "hyperpolymath", "doppel").map(|dirs| dirs.config_dir().join("job.toml"))
}

impl JobConfig {
    pub fn load(path: &Path) -> DoppelResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DoppelError::from_io("read", path.display().to_string(), e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> DoppelResult<Self> {
        let job: JobConfig = toml::from_str(text).map_err(|e| DoppelError::Config(e.to_string()))?;
        if job.pairs.is_empty() {
            return Err(DoppelError::Config("job has no [[pair]] entries".to_string()));
        }
        if job.compare.max_parallel == 0 {
            return Err(DoppelError::Config("compare.max_parallel must be at least 1".to_string()));
        }
        job.sync.direction.directions()?;
        Ok(job)
    }

    /// Folder pairs with relative local paths taken relative to `base_dir`.
    pub fn folder_pairs(&self, base_dir: &Path) -> DoppelResult<Vec<FolderPairSpec>> {
        self.pairs
            .iter()
            .map(|pair| {
                Ok(FolderPairSpec::new(
                    resolve_phrase(&pair.left, base_dir)?,
                    resolve_phrase(&pair.right, base_dir)?,
                ))
            })
            .collect()
    }

    pub fn exec_options(&self) -> ExecOptions {
        let mut lock = LockOptions::default();
        if let Some(secs) = self.sync.lock_wait_secs {
            lock.wait = Duration::from_secs(secs);
        }
        ExecOptions {
            deletion: self.sync.deletion,
            copy_permissions: self.sync.copy_permissions,
            use_locks: self.sync.use_locks,
            lock,
            job_name: self.name.clone(),
        }
    }
}

fn resolve_phrase(phrase: &str, base_dir: &Path) -> DoppelResult<AbstractPath> {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return Err(DoppelError::Config("empty folder path in [[pair]]".to_string()));
    }
    if !phrase.contains("://") && Path::new(phrase).is_relative() {
        return AbstractPath::native(base_dir.join(phrase));
    }
    AbstractPath::parse_phrase(phrase)
}
