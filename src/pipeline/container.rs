// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Step and service declarations

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::settings::Params;
use crate::constraint::When;
use crate::utils::yaml::{one_or_many, optional_one_or_many};

/// What to do when a step fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Fail,
    Ignore,
}

/// A secret exposed to a step as an environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretRef {
    /// Secret name
    pub source: String,
    /// Environment variable name
    pub target: String,
}

impl<'de> Deserialize<'de> for SecretRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Short(String),
            Long { source: String, target: String },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Short(name) => SecretRef {
                source: name.clone(),
                target: name,
            },
            Raw::Long { source, target } => SecretRef { source, target },
        })
    }
}

/// One declared step or service
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub pull: bool,
    pub detach: bool,
    pub privileged: bool,
    pub directory: String,
    pub failure: FailurePolicy,
    pub group: String,

    #[serde(deserialize_with = "one_or_many")]
    pub commands: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub entrypoint: Vec<String>,
    pub environment: Params,
    pub settings: Params,
    pub secrets: Vec<SecretRef>,

    /// `None` when the key is absent; an empty list still selects dependency mode
    #[serde(deserialize_with = "optional_one_or_many")]
    pub depends_on: Option<Vec<String>>,
    #[serde(deserialize_with = "optional_one_or_many")]
    pub needs: Option<Vec<String>>,
    pub when: When,

    pub network_mode: String,
    #[serde(deserialize_with = "one_or_many")]
    pub networks: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub volumes: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub tmpfs: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub devices: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub dns: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub dns_search: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub extra_hosts: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub ports: Vec<String>,

    #[serde(deserialize_with = "byte_size")]
    pub mem_limit: i64,
    #[serde(deserialize_with = "byte_size")]
    pub memswap_limit: i64,
    #[serde(deserialize_with = "byte_size")]
    pub shm_size: i64,
    pub cpu_quota: i64,
    pub cpu_shares: i64,
    pub cpu_set: String,

    /// Zero-based declaration order within its section
    #[serde(skip)]
    pub position: usize,
}

impl Container {
    /// Plugins carry settings instead of commands
    pub fn is_plugin(&self) -> bool {
        self.commands.is_empty() && self.entrypoint.is_empty()
    }

    /// Whether this container takes part in dependency scheduling
    pub fn declares_dependencies(&self) -> bool {
        self.depends_on.is_some() || self.needs.is_some()
    }
}

/// Parse `512`, `512k`, `64m`, `1g` (binary units) into bytes
pub fn parse_byte_size(raw: &str) -> Option<i64> {
    let raw = raw.trim().to_ascii_lowercase();
    let raw = raw.strip_suffix('b').unwrap_or(&raw);
    let (digits, multiplier) = match raw.chars().last()? {
        'k' => (&raw[..raw.len() - 1], 1i64 << 10),
        'm' => (&raw[..raw.len() - 1], 1i64 << 20),
        'g' => (&raw[..raw.len() - 1], 1i64 << 30),
        't' => (&raw[..raw.len() - 1], 1i64 << 40),
        _ => (raw, 1),
    };
    digits.trim().parse::<i64>().ok()?.checked_mul(multiplier)
}

fn byte_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if raw.is_empty() {
        return Ok(0);
    }
    parse_byte_size(&raw).ok_or_else(|| de::Error::custom(format!("invalid size '{}'", raw)))
}

/// Ordered collection of containers
///
/// Accepts a mapping keyed by name or a list of named entries. List entries
/// repeating an earlier name are dropped and recorded in `duplicates`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerList {
    pub containers: Vec<Container>,
    pub duplicates: Vec<String>,
}

impl ContainerList {
    pub fn new(mut containers: Vec<Container>) -> Self {
        for (position, container) in containers.iter_mut().enumerate() {
            container.position = position;
        }
        Self {
            containers,
            duplicates: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Container> {
        self.containers.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

impl<'de> Deserialize<'de> for ContainerList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ContainerListVisitor)
    }
}

struct ContainerListVisitor;

impl<'de> Visitor<'de> for ContainerListVisitor {
    type Value = ContainerList;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a mapping of named steps or a list of steps")
    }

    fn visit_unit<E: de::Error>(self) -> Result<ContainerList, E> {
        Ok(ContainerList::default())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<ContainerList, A::Error> {
        let mut containers: Vec<Container> = Vec::new();
        while let Some(name) = map.next_key::<String>()? {
            let mut container = map.next_value::<Option<Container>>()?.unwrap_or_default();
            if containers.iter().any(|c| c.name == name) {
                return Err(de::Error::custom(format!("duplicate step name '{}'", name)));
            }
            container.name = name;
            containers.push(container);
        }
        Ok(ContainerList::new(containers))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ContainerList, A::Error> {
        let mut containers: Vec<Container> = Vec::new();
        let mut duplicates = Vec::new();
        while let Some(container) = seq.next_element::<Container>()? {
            if !container.name.is_empty() && containers.iter().any(|c| c.name == container.name) {
                duplicates.push(container.name);
                continue;
            }
            containers.push(container);
        }
        let mut list = ContainerList::new(containers);
        list.duplicates = duplicates;
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_form_keeps_declaration_order() {
        let list: ContainerList =
            serde_yaml::from_str("zeta:\n  image: a\nalpha:\n  image: b\n").unwrap();
        let names: Vec<&str> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(list.containers[1].position, 1);
    }

    #[test]
    fn test_list_form_drops_duplicates() {
        let list: ContainerList = serde_yaml::from_str(
            "- name: build\n  image: a\n- name: build\n  image: b\n- name: test\n  image: c\n",
        )
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.duplicates, vec!["build"]);
        assert_eq!(list.get("build").unwrap().image, "a");
        assert_eq!(list.get("test").unwrap().position, 1);
    }

    #[test]
    fn test_dependency_presence() {
        let list: ContainerList = serde_yaml::from_str(
            "a:\n  image: x\nb:\n  image: x\n  depends_on: []\nc:\n  image: x\n  needs: db\n",
        )
        .unwrap();
        assert_eq!(list.containers[0].depends_on, None);
        assert_eq!(list.containers[1].depends_on, Some(vec![]));
        assert!(list.containers[1].declares_dependencies());
        assert_eq!(list.containers[2].needs, Some(vec!["db".to_string()]));
    }

    #[test]
    fn test_plugin_detection() {
        let list: ContainerList = serde_yaml::from_str(
            "publish:\n  image: plugins/docker\n  settings:\n    repo: acme/app\nbuild:\n  image: rust\n  commands: cargo build\n",
        )
        .unwrap();
        assert!(list.get("publish").unwrap().is_plugin());
        assert!(!list.get("build").unwrap().is_plugin());
        assert_eq!(list.get("build").unwrap().commands, vec!["cargo build"]);
    }

    #[test]
    fn test_secret_forms() {
        let c: Container =
            serde_yaml::from_str("secrets:\n  - token\n  - source: pw\n    target: DOCKER_PASSWORD\n").unwrap();
        assert_eq!(c.secrets[0].target, "token");
        assert_eq!(c.secrets[1].source, "pw");
        assert_eq!(c.secrets[1].target, "DOCKER_PASSWORD");
    }

    #[test]
    fn test_byte_sizes() {
        assert_eq!(parse_byte_size("512"), Some(512));
        assert_eq!(parse_byte_size("64m"), Some(64 << 20));
        assert_eq!(parse_byte_size("1GB"), Some(1 << 30));
        assert_eq!(parse_byte_size("lots"), None);

        let c: Container = serde_yaml::from_str("mem_limit: 1g\nshm_size: 1024").unwrap();
        assert_eq!(c.mem_limit, 1 << 30);
        assert_eq!(c.shm_size, 1024);
    }

    #[test]
    fn test_failure_policy() {
        let c: Container = serde_yaml::from_str("failure: ignore").unwrap();
        assert_eq!(c.failure, FailurePolicy::Ignore);
    }
}
