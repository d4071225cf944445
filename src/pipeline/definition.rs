// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Workflow definition structures
//!
//! Defines the schema of one pipeline file. Unknown top-level keys such as
//! `matrix` (consumed by matrix expansion) and `variables` (a home for YAML
//! anchors) are ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::container::ContainerList;
use crate::constraint::{List, When};
use crate::errors::StagecraftResult;
use crate::utils::yaml::one_or_many;

/// One parsed workflow file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Workflow {
    /// Workflow-level condition
    pub when: When,

    /// Names of other workflows in the same event that must finish first
    #[serde(deserialize_with = "one_or_many")]
    pub depends_on: Vec<String>,

    /// Terminal statuses of the dependencies that still trigger this workflow
    #[serde(deserialize_with = "one_or_many")]
    pub runs_on: Vec<String>,

    /// Do not synthesize the default clone step
    pub skip_clone: bool,

    /// Agent selection labels
    pub labels: BTreeMap<String, String>,

    /// Deprecated: use `labels.platform`
    pub platform: String,

    /// Deprecated: use `when.branch`
    pub branches: Option<List>,

    pub workspace: Workspace,

    pub clone: ContainerList,
    pub steps: ContainerList,
    pub services: ContainerList,

    /// Paths restored before and rebuilt after the steps
    #[serde(deserialize_with = "one_or_many")]
    pub cache: Vec<String>,
}

/// Workspace location inside the containers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workspace {
    pub base: String,
    pub path: String,
}

impl Workflow {
    /// Parse a workflow from substituted YAML text
    pub fn from_yaml(yaml: &str) -> StagecraftResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Whether any step or service uses `depends_on` / `needs`
    pub fn uses_dependencies(&self) -> bool {
        self.steps
            .iter()
            .chain(self.services.iter())
            .any(|c| c.declares_dependencies())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SettingValue;

    const SAMPLE: &str = r#"
when:
  branch: main
depends_on: [lint]
runs_on: [success, failure]
labels:
  platform: linux/arm64
  priority: 1
workspace:
  base: /go
  path: src/example.com/app
matrix:
  GO: [1.21]
variables:
  - &image golang:1.21
cache: [.cargo, target]
services:
  db:
    image: postgres:16
    environment:
      POSTGRES_PASSWORD: secret
steps:
  build:
    image: *image
    commands:
      - go build ./...
  publish:
    image: plugins/docker
    settings:
      repo: acme/app
      password:
        from_secret: docker_password
    depends_on: [build]
"#;

    #[test]
    fn test_parse_full_workflow() {
        let wf = Workflow::from_yaml(SAMPLE).unwrap();

        assert_eq!(wf.depends_on, vec!["lint"]);
        assert_eq!(wf.runs_on, vec!["success", "failure"]);
        assert_eq!(wf.labels["platform"], "linux/arm64");
        assert_eq!(wf.labels["priority"], "1");
        assert_eq!(wf.workspace.base, "/go");
        assert_eq!(wf.cache, vec![".cargo", "target"]);
        assert_eq!(wf.when.constraints.len(), 1);

        assert_eq!(wf.services.len(), 1);
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps.get("build").unwrap().image, "golang:1.21");

        let publish = wf.steps.get("publish").unwrap();
        assert_eq!(publish.position, 1);
        assert_eq!(
            publish.settings.get("password"),
            Some(&SettingValue::Secret("docker_password".into()))
        );
        assert!(wf.uses_dependencies());
    }

    #[test]
    fn test_minimal_workflow() {
        let wf = Workflow::from_yaml("steps:\n  test:\n    image: alpine\n    commands: echo hi\n").unwrap();
        assert!(wf.when.is_empty());
        assert!(wf.clone.is_empty());
        assert!(!wf.skip_clone);
        assert!(!wf.uses_dependencies());
    }

    #[test]
    fn test_deprecated_branches() {
        let wf = Workflow::from_yaml("branches: [main, release/*]\nsteps: {}\n").unwrap();
        let branches = wf.branches.unwrap();
        assert!(branches.matches("release/2"));
        assert!(!branches.matches("dev"));
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let err = Workflow::from_yaml("steps: [\n").unwrap_err();
        assert!(matches!(err, crate::errors::StagecraftError::Yaml { .. }));
    }
}
