// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Operator configuration
//!
//! Loaded from `stagecraft.yaml` / `stagecraft.toml` (format chosen by file
//! extension) and turned into explicit [`CompilerOptions`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::compiler::{
    Cacher, CompilerOptions, Netrc, ProxyOptions, Registry, ResourceLimits, Secret, VolumeCacher,
    DEFAULT_CLONE_IMAGE, DEFAULT_ESCALATE,
};
use crate::errors::StagecraftResult;
use crate::metadata::{Forge, Metadata, System};
use crate::pipeline::Workspace;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "stagecraft.yaml";

/// Server-side settings shared by every compilation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Image of the synthesized clone step
    pub default_clone_image: String,

    /// Plugin images allowed to run privileged
    pub escalate: Vec<String>,

    pub limits: ResourceLimits,

    /// Volumes mounted into every step
    pub volumes: Vec<String>,

    /// Networks every step joins
    pub networks: Vec<String>,

    pub workspace: Workspace,
    pub proxy: ProxyOptions,

    /// Credentials for clone steps
    pub netrc: Option<Netrc>,

    /// Only hand netrc credentials to trusted repositories
    pub netrc_only_trusted: bool,

    /// Host directory backing the volume cache; empty disables caching
    pub cache_base: String,

    /// Global variables for substitution and step environments
    pub environment: BTreeMap<String, String>,

    pub secrets: Vec<Secret>,
    pub registries: Vec<Registry>,

    pub system: System,
    pub forge: Forge,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_clone_image: DEFAULT_CLONE_IMAGE.to_string(),
            escalate: DEFAULT_ESCALATE.iter().map(|s| s.to_string()).collect(),
            limits: ResourceLimits::default(),
            volumes: Vec::new(),
            networks: Vec::new(),
            workspace: Workspace::default(),
            proxy: ProxyOptions::default(),
            netrc: None,
            netrc_only_trusted: true,
            cache_base: String::new(),
            environment: BTreeMap::new(),
            secrets: Vec::new(),
            registries: Vec::new(),
            system: System::default(),
            forge: Forge::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> StagecraftResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Ok(serde_yaml::from_str(&content)?),
        }
    }

    /// Compiler options for one compilation
    pub fn compiler_options(&self, prefix: &str, trusted: bool, local: bool) -> CompilerOptions {
        CompilerOptions {
            prefix: prefix.to_string(),
            local,
            trusted,
            escalate: self.escalate.clone(),
            default_clone_image: self.default_clone_image.clone(),
            limits: self.limits.clone(),
            volumes: self.volumes.clone(),
            networks: self.networks.clone(),
            workspace: self.workspace.clone(),
            proxy: self.proxy.clone(),
            netrc: self.netrc.clone(),
            netrc_only_trusted: self.netrc_only_trusted,
            secrets: self.secrets.clone(),
            registries: self.registries.clone(),
            env: self.environment.clone(),
            cacher: if self.cache_base.is_empty() {
                None
            } else {
                Some(Arc::new(VolumeCacher::new(self.cache_base.clone())) as Arc<dyn Cacher>)
            },
        }
    }

    /// Metadata template carrying the system and forge description
    pub fn metadata(&self) -> Metadata {
        Metadata {
            sys: self.system.clone(),
            forge: self.forge.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig::load(&temp.path().join("nope.yaml")).unwrap();
        assert_eq!(config.default_clone_image, DEFAULT_CLONE_IMAGE);
        assert!(config.netrc_only_trusted);
        assert_eq!(config.system.name, "stagecraft");
    }

    #[test]
    fn test_load_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stagecraft.yaml");
        std::fs::write(
            &path,
            r#"
escalate: [plugins/docker]
limits:
  mem_limit: 1073741824
cache_base: /var/cache/stagecraft
environment:
  REGISTRY: registry.local
secrets:
  - name: token
    value: abc
    events: [push, tag]
registries:
  - hostname: registry.local
    username: bot
    password: pw
system:
  host: ci.example.com
  platform: linux/arm64
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.escalate, vec!["plugins/docker"]);
        assert_eq!(config.limits.mem_limit, 1 << 30);
        assert_eq!(config.secrets[0].events.len(), 2);
        assert_eq!(config.system.platform, "linux/arm64");
        assert_eq!(config.system.name, "stagecraft");

        let options = config.compiler_options("sc_1", true, false);
        assert_eq!(options.prefix, "sc_1");
        assert!(options.trusted);
        assert!(options.cacher.is_some());
        assert_eq!(options.env["REGISTRY"], "registry.local");

        assert_eq!(config.metadata().sys.host, "ci.example.com");
    }

    #[test]
    fn test_load_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stagecraft.toml");
        std::fs::write(
            &path,
            r#"
default_clone_image = "registry.local/git:2"
netrc_only_trusted = false

[workspace]
base = "/src"

[proxy]
http = "http://proxy:3128"
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.default_clone_image, "registry.local/git:2");
        assert!(!config.netrc_only_trusted);
        assert_eq!(config.workspace.base, "/src");
        assert_eq!(config.proxy.http, "http://proxy:3128");
        assert!(config.compiler_options("x", false, false).cacher.is_none());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stagecraft.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(ServerConfig::load(&path).is_err());
    }
}
