// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Run-time metadata
//!
//! Describes the event that triggered a pipeline: the repository, the
//! current and previous pipeline runs, the commit, the workflow and step
//! being compiled, and the CI system itself. Conditions are evaluated
//! against this model and every compiled step receives it as `CI_*`
//! environment variables.

mod environ;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pipeline trigger event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    #[default]
    Push,
    PullRequest,
    PullRequestClosed,
    Tag,
    Release,
    Deployment,
    Cron,
    Manual,
}

impl Event {
    /// All known events, in documentation order
    pub const ALL: [Event; 8] = [
        Event::Push,
        Event::PullRequest,
        Event::PullRequestClosed,
        Event::Tag,
        Event::Release,
        Event::Deployment,
        Event::Cron,
        Event::Manual,
    ];

    /// Events a condition matches when it declares no event filter
    pub const DEFAULT_FILTER: [Event; 5] = [
        Event::Push,
        Event::PullRequest,
        Event::Tag,
        Event::Deployment,
        Event::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::PullRequest => "pull_request",
            Self::PullRequestClosed => "pull_request_closed",
            Self::Tag => "tag",
            Self::Release => "release",
            Self::Deployment => "deployment",
            Self::Cron => "cron",
            Self::Manual => "manual",
        }
    }

    pub fn is_pull_request(&self) -> bool {
        matches!(self, Self::PullRequest | Self::PullRequestClosed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .iter()
            .find(|e| e.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown event: {}", s))
    }
}

/// Complete metadata for one compilation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub repo: Repo,
    pub curr: PipelineInfo,
    pub prev: PipelineInfo,
    pub workflow: WorkflowInfo,
    pub step: StepInfo,
    pub sys: System,
    pub forge: Forge,
}

/// Repository the pipeline belongs to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Repo {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub remote_id: String,
    pub forge_url: String,
    pub clone_url: String,
    pub clone_ssh_url: String,
    pub default_branch: String,
    pub private: bool,
    pub trusted: bool,
}

impl Repo {
    /// `owner/name`, or just the name for owner-less repositories
    pub fn full_name(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.owner, self.name)
        }
    }
}

/// One pipeline run (current or previous)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineInfo {
    pub number: i64,
    pub parent: i64,
    pub created: i64,
    pub started: i64,
    pub finished: i64,
    pub status: String,
    pub event: Event,
    pub forge_url: String,
    pub deploy_to: String,
    pub deploy_task: String,
    pub commit: Commit,
    pub cron: String,
}

/// Commit information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Commit {
    pub sha: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub refspec: String,
    pub branch: String,
    pub message: String,
    pub author: Author,
    pub changed_files: Vec<String>,
    pub pull_request_labels: Vec<String>,
    pub is_prerelease: bool,
}

/// Commit author
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// The workflow (file + matrix variant) being compiled
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowInfo {
    pub name: String,
    pub number: i64,
    pub matrix: BTreeMap<String, String>,
}

/// The step being compiled
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepInfo {
    pub name: String,
    pub number: i64,
}

/// The CI system compiling the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct System {
    pub name: String,
    pub host: String,
    pub url: String,
    pub platform: String,
    pub version: String,
}

impl Default for System {
    fn default() -> Self {
        Self {
            name: "stagecraft".into(),
            host: String::new(),
            url: String::new(),
            platform: "linux/amd64".into(),
            version: crate::VERSION.into(),
        }
    }
}

/// The forge hosting the repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Forge {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

impl Metadata {
    /// Return a copy scoped to one workflow (file + matrix variant)
    pub fn for_workflow(&self, name: &str, number: i64, matrix: &BTreeMap<String, String>) -> Self {
        let mut scoped = self.clone();
        scoped.workflow = WorkflowInfo {
            name: name.to_string(),
            number,
            matrix: matrix.clone(),
        };
        scoped
    }

    /// The full `CI_*` environment surface for this metadata
    pub fn environ(&self) -> BTreeMap<String, String> {
        environ::environ(self)
    }
}
