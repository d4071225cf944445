// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for stagecraft.

pub mod compile;
pub mod graph;
pub mod lint;
pub mod matrix;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::envsubst;
use crate::matrix::Axis;
use crate::metadata::{Event, Metadata};

/// Pipeline compiler and stage scheduler
///
/// Turns workflow files plus commit metadata into ordered execution plans.
#[derive(Parser, Debug)]
#[clap(
    name = "stagecraft",
    version,
    about = "Pipeline compiler and stage scheduler for container-based CI/CD",
    long_about = None,
    after_help = "Examples:\n\
        stagecraft compile                          Compile the workflows of a push to the current branch\n\
        stagecraft compile --event tag --ref refs/tags/v1.0.0\n\
        stagecraft lint .stagecraft/build.yaml      Check one workflow file\n\
        stagecraft graph .stagecraft/build.yaml -f mermaid\n\
        stagecraft matrix .stagecraft/test.yaml     Show the matrix variants of a file\n\n\
        See 'stagecraft <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Operator configuration file (YAML or TOML)
    #[clap(
        long,
        global = true,
        env = "STAGECRAFT_CONFIG",
        default_value = DEFAULT_CONFIG_FILE,
        value_name = "FILE"
    )]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile every workflow of one event into an execution plan
    Compile {
        /// Workflow file or directory, instead of the default lookup
        #[clap(short, long)]
        path: Option<String>,

        #[clap(flatten)]
        event: EventArgs,

        /// Treat the repository as trusted
        #[clap(long)]
        trusted: bool,

        /// Local mode: no clone step, no workspace volume
        #[clap(long)]
        local: bool,

        /// Extra global variables (KEY=VALUE)
        #[clap(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Output format
        #[clap(short, long, value_enum, default_value = "json")]
        format: PlanFormat,
    },

    /// Lint a workflow file
    Lint {
        /// Workflow file
        file: PathBuf,

        /// Lint as a trusted repository
        #[clap(long)]
        trusted: bool,
    },

    /// Show the stages of a workflow as a graph
    Graph {
        /// Workflow file
        file: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: GraphFormat,
    },

    /// Show the matrix variants of a workflow file
    Matrix {
        /// Workflow file
        file: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// The triggering event
#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// Event type
    #[clap(long, default_value = "push")]
    pub event: Event,

    /// Repository as owner/name (defaults to the directory name)
    #[clap(long)]
    pub repo: Option<String>,

    /// Commit branch
    #[clap(short, long, default_value = "main")]
    pub branch: String,

    /// Git reference (refs/heads/..., refs/tags/..., refs/pull/...)
    #[clap(long = "ref")]
    pub reference: Option<String>,

    /// Commit SHA
    #[clap(long, default_value = "")]
    pub commit: String,

    /// Commit message
    #[clap(long, default_value = "")]
    pub message: String,

    /// Files changed by the commit
    #[clap(long = "changed-file", value_name = "PATH")]
    pub changed_files: Vec<String>,

    /// Deployment target
    #[clap(long, default_value = "")]
    pub deploy_to: String,

    /// Cron job name
    #[clap(long, default_value = "")]
    pub cron: String,

    /// Pipeline number
    #[clap(long, default_value = "1")]
    pub number: i64,
}

impl EventArgs {
    /// Fill `metadata` with the event described by the flags
    pub fn apply(&self, metadata: &mut Metadata, default_repo: &str) {
        let repo = self.repo.as_deref().unwrap_or(default_repo);
        match repo.split_once('/') {
            Some((owner, name)) => {
                metadata.repo.owner = owner.to_string();
                metadata.repo.name = name.to_string();
            }
            None => metadata.repo.name = repo.to_string(),
        }
        if metadata.repo.default_branch.is_empty() {
            metadata.repo.default_branch = "main".into();
        }

        let curr = &mut metadata.curr;
        curr.number = self.number;
        curr.event = self.event;
        curr.deploy_to = self.deploy_to.clone();
        curr.cron = self.cron.clone();

        let commit = &mut curr.commit;
        commit.branch = self.branch.clone();
        commit.reference = self
            .reference
            .clone()
            .unwrap_or_else(|| format!("refs/heads/{}", self.branch));
        commit.sha = self.commit.clone();
        commit.message = self.message.clone();
        commit.changed_files = self.changed_files.clone();
    }
}

/// Output format for compiled plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanFormat {
    Json,
    Yaml,
}

/// Output format for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Parse `KEY=VALUE` pairs
pub fn parse_env(pairs: &[String]) -> miette::Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(miette::miette!("Invalid variable '{}', expected KEY=VALUE", pair)),
        })
        .collect()
}

/// Read a workflow file, with a friendly error when it is missing
pub(crate) fn read_workflow_file(path: &std::path::Path) -> miette::Result<String> {
    if !path.exists() {
        return Err(miette::miette!(
            "Workflow file not found: {}",
            path.display()
        ));
    }
    std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read '{}': {}", path.display(), e))
}

/// Substitute one matrix variant of a standalone workflow file
///
/// Uses an empty push event for the `CI_*` variables.
pub(crate) fn substitute_variant(data: &str, axis: &Axis) -> miette::Result<String> {
    let mut environ = Metadata::default().environ();
    environ.extend(axis.vars().clone());
    Ok(envsubst::substitute(data, &environ)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        let env = parse_env(&["A=1".into(), "B=x=y".into(), "C=".into()]).unwrap();
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "x=y");
        assert_eq!(env["C"], "");
        assert!(parse_env(&["novalue".into()]).is_err());
        assert!(parse_env(&["=x".into()]).is_err());
    }

    #[test]
    fn test_event_args_apply() {
        let cli = Cli::parse_from([
            "stagecraft",
            "compile",
            "--event",
            "tag",
            "--ref",
            "refs/tags/v1.0.0",
            "--repo",
            "acme/app",
            "--changed-file",
            "src/main.rs",
        ]);
        let Commands::Compile { event, .. } = cli.command else {
            panic!("expected compile command");
        };

        let mut metadata = Metadata::default();
        event.apply(&mut metadata, "ignored");
        assert_eq!(metadata.repo.full_name(), "acme/app");
        assert_eq!(metadata.curr.event, Event::Tag);
        assert_eq!(metadata.curr.commit.reference, "refs/tags/v1.0.0");
        assert_eq!(metadata.curr.commit.changed_files, vec!["src/main.rs"]);
    }

    #[test]
    fn test_default_reference_from_branch() {
        let cli = Cli::parse_from(["stagecraft", "compile", "--branch", "dev"]);
        let Commands::Compile { event, .. } = cli.command else {
            panic!("expected compile command");
        };
        let mut metadata = Metadata::default();
        event.apply(&mut metadata, "app");
        assert_eq!(metadata.repo.full_name(), "app");
        assert_eq!(metadata.curr.commit.reference, "refs/heads/dev");
    }
}
