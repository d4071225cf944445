// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Pipeline configuration sources
//!
//! A [`ConfigSource`] fetches the raw workflow files of one repository at one
//! commit. Hosting providers implement it over their APIs; the
//! [`FilesystemSource`] reads a working copy.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{StagecraftError, StagecraftResult};
use crate::metadata::{Commit, Repo};

/// Directory holding one file per workflow
pub const CONFIG_DIR: &str = ".stagecraft";

/// Single-file configuration candidates, in lookup order
pub const CONFIG_FILES: [&str; 2] = [".stagecraft.yaml", ".stagecraft.yml"];

/// One raw workflow file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConfigFile {
    /// Path relative to the repository root
    pub name: String,
    pub data: String,
}

impl RawConfigFile {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// BLAKE3 hex digest of the file content
    pub fn hash(&self) -> String {
        blake3::hash(self.data.as_bytes()).to_hex().to_string()
    }
}

/// Fetches the configuration files for a commit
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self, repo: &Repo, commit: &Commit) -> StagecraftResult<Vec<RawConfigFile>>;
}

/// Reads workflow files from a local working copy
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    root: PathBuf,
    path: Option<String>,
}

impl FilesystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path: None,
        }
    }

    /// Only look at `path` (a file or a directory) instead of the defaults
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    async fn read_candidate(&self, candidate: &str) -> StagecraftResult<Vec<RawConfigFile>> {
        let full = self.root.join(candidate);
        let meta = match tokio::fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            read_dir(&full, candidate).await
        } else {
            let data = tokio::fs::read_to_string(&full).await?;
            Ok(vec![RawConfigFile::new(candidate, data)])
        }
    }
}

#[async_trait]
impl ConfigSource for FilesystemSource {
    async fn fetch(&self, _repo: &Repo, _commit: &Commit) -> StagecraftResult<Vec<RawConfigFile>> {
        let candidates: Vec<String> = match &self.path {
            Some(path) => vec![path.clone()],
            None => std::iter::once(CONFIG_DIR)
                .chain(CONFIG_FILES)
                .map(str::to_string)
                .collect(),
        };

        for candidate in &candidates {
            let files = self.read_candidate(candidate).await?;
            if !files.is_empty() {
                debug!(source = %candidate, files = files.len(), "loaded pipeline configuration");
                return Ok(files);
            }
        }

        Err(StagecraftError::ConfigNotFound { tried: candidates })
    }
}

/// YAML files directly inside `dir`, sorted by name
async fn read_dir(dir: &Path, prefix: &str) -> StagecraftResult<Vec<RawConfigFile>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".yaml") || name.ends_with(".yml") {
            names.push(name);
        }
    }
    names.sort();

    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let data = tokio::fs::read_to_string(dir.join(&name)).await?;
        files.push(RawConfigFile::new(
            format!("{}/{}", prefix.trim_end_matches('/'), name),
            data,
        ));
    }
    Ok(files)
}
