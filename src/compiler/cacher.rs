// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Cache restore/rebuild step synthesis

use std::fmt::Debug;

use crate::pipeline::{Container, Params, SettingValue};

const CACHE_IMAGE: &str = "plugins/volume-cache:1.0.0";
const CACHE_MOUNT: &str = "/cache";

/// Produces the implicit steps that restore and rebuild cached paths
pub trait Cacher: Debug + Send + Sync {
    /// Step that restores `mounts` before the workflow's steps run
    fn restore(&self, repo: &str, branch: &str, mounts: &[String]) -> Container;

    /// Step that saves `mounts` after the workflow's steps ran
    fn rebuild(&self, repo: &str, branch: &str, mounts: &[String]) -> Container;
}

/// Caches paths on a host directory mounted into the cache plugin
#[derive(Debug, Clone)]
pub struct VolumeCacher {
    base: String,
}

impl VolumeCacher {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    fn container(&self, name: &str, mode: &str, repo: &str, mounts: &[String]) -> Container {
        let settings = vec![
            (
                "mount".to_string(),
                SettingValue::Sequence(mounts.iter().cloned().map(SettingValue::Scalar).collect()),
            ),
            ("path".to_string(), SettingValue::Scalar(CACHE_MOUNT.into())),
            (mode.to_string(), SettingValue::Scalar("true".into())),
            ("fallback_to".to_string(), SettingValue::Scalar("master".into())),
        ];

        Container {
            name: name.to_string(),
            image: CACHE_IMAGE.to_string(),
            settings: Params(settings),
            volumes: vec![format!(
                "{}/{}:{}",
                self.base.trim_end_matches('/'),
                repo,
                CACHE_MOUNT
            )],
            ..Default::default()
        }
    }
}

impl Cacher for VolumeCacher {
    fn restore(&self, repo: &str, _branch: &str, mounts: &[String]) -> Container {
        self.container("restore_cache", "restore", repo, mounts)
    }

    fn rebuild(&self, repo: &str, _branch: &str, mounts: &[String]) -> Container {
        self.container("rebuild_cache", "rebuild", repo, mounts)
    }
}
