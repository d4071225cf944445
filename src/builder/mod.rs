// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Pipeline orchestration
//!
//! Builds every workflow of one trigger event: each file is expanded into
//! its matrix variants, and each variant is substituted, parsed, linted,
//! checked against its conditions and compiled. Items whose cross-file
//! dependencies are missing are pruned afterwards.

mod plan;

pub use plan::{PipelinePlan, PlannedWorkflow, StepRecord};

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

use crate::backend::Config;
use crate::compiler::{Compiler, CompilerOptions};
use crate::envsubst;
use crate::errors::{LintIssue, StagecraftError, StagecraftResult};
use crate::matrix::{self, Axis};
use crate::metadata::{Event, Metadata};
use crate::pipeline::{find_cycle, Linter, Workflow};
use crate::source::RawConfigFile;

/// State of a workflow before it is handed to an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Pending,
    Skipped,
}

/// Placeholder record of one workflow (file + matrix variant)
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRecord {
    /// Sequence number within the event, starting at 1
    pub pid: usize,
    pub name: String,
    pub state: State,
    pub axis: Axis,
}

/// One compiled workflow variant
#[derive(Debug, Clone, Serialize)]
pub struct PipelineItem {
    pub workflow: WorkflowRecord,
    pub labels: BTreeMap<String, String>,
    pub depends_on: Vec<String>,
    pub runs_on: Vec<String>,
    pub config: Config,
    /// BLAKE3 digest of the source file
    pub hash: String,
}

/// Non-blocking linter finding of one workflow
#[derive(Debug, Clone, Serialize)]
pub struct BuildWarning {
    pub workflow: String,
    pub issue: LintIssue,
}

/// Result of building one event
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildOutput {
    pub items: Vec<PipelineItem>,
    pub warnings: Vec<BuildWarning>,
}

/// Builds all workflows of one trigger event
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    metadata: Metadata,
    options: CompilerOptions,
}

impl PipelineBuilder {
    /// `options.env` holds the operator's global variables; `options.prefix`
    /// is suffixed with each workflow's pid.
    pub fn new(metadata: Metadata, options: CompilerOptions) -> Self {
        Self { metadata, options }
    }

    pub fn build(&self, files: &[RawConfigFile]) -> StagecraftResult<BuildOutput> {
        let mut files: Vec<&RawConfigFile> = files.iter().collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let mut output = BuildOutput::default();
        let mut pid = 0;

        for file in files {
            let name = workflow_name(&file.name);
            let axes = matrix::expand(&file.data).map_err(|e| e.in_workflow(&name, ""))?;
            let hash = file.hash();

            for axis in axes {
                pid += 1;
                let label = axis.to_string();
                let record = WorkflowRecord {
                    pid,
                    name: name.clone(),
                    state: State::Pending,
                    axis,
                };

                let item = self
                    .build_item(file, record, &hash, &mut output.warnings)
                    .map_err(|e| e.in_workflow(&name, &label))?;
                if let Some(item) = item {
                    output.items.push(item);
                }
            }
        }

        output.items = prune_missing_dependencies(output.items);

        let names: Vec<(&str, &[String])> = output
            .items
            .iter()
            .map(|i| (i.workflow.name.as_str(), i.depends_on.as_slice()))
            .collect();
        if let Some(path) = find_cycle(names) {
            return Err(StagecraftError::WorkflowCycle { path });
        }

        if !output.items.is_empty()
            && !output.items.iter().any(|i| i.workflow.state == State::Pending)
        {
            return Err(StagecraftError::NoStartpoint);
        }

        info!(
            workflows = output.items.len(),
            warnings = output.warnings.len(),
            "pipeline built"
        );
        Ok(output)
    }

    fn build_item(
        &self,
        file: &RawConfigFile,
        mut record: WorkflowRecord,
        hash: &str,
        warnings: &mut Vec<BuildWarning>,
    ) -> StagecraftResult<Option<PipelineItem>> {
        let metadata = self
            .metadata
            .for_workflow(&record.name, record.pid as i64, record.axis.vars());
        let environ = self.environ(&metadata, &record.axis);

        let substituted = envsubst::substitute(&file.data, &environ)?;
        let workflow = Workflow::from_yaml(&substituted)?;

        for issue in Linter::new(self.options.trusted).lint(&workflow)? {
            warnings.push(BuildWarning {
                workflow: record.name.clone(),
                issue,
            });
        }

        if !workflow.when.matches(&metadata, true, &environ)? {
            debug!(workflow = %record.name, axis = %record.axis, "marked as skipped, does not match metadata");
            record.state = State::Skipped;
        }
        if !branch_filter_matches(&workflow, &metadata) {
            debug!(workflow = %record.name, "marked as skipped, does not match branch filter");
            record.state = State::Skipped;
        }

        let mut options = self
            .options
            .clone()
            .with_prefix(format!("{}_{}", self.options.prefix, record.pid));
        options.env = environ;
        let config = Compiler::new(options).compile_steps(&workflow, &metadata)?;

        if config.stages.is_empty() {
            debug!(workflow = %record.name, "no steps to run");
            return Ok(None);
        }

        let mut labels = workflow.labels.clone();
        if !labels.contains_key("platform") {
            let platform = if workflow.platform.is_empty() {
                metadata.sys.platform.clone()
            } else {
                workflow.platform.clone()
            };
            labels.insert("platform".into(), platform);
        }

        Ok(Some(PipelineItem {
            workflow: record,
            labels,
            depends_on: workflow.depends_on,
            runs_on: workflow.runs_on,
            config,
            hash: hash.to_string(),
        }))
    }

    /// Metadata environment plus matrix variables; global variables never
    /// override existing keys
    fn environ(&self, metadata: &Metadata, axis: &Axis) -> BTreeMap<String, String> {
        let mut environ = metadata.environ();
        for (key, value) in axis.vars() {
            environ.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.options.env {
            environ.entry(key.clone()).or_insert_with(|| value.clone());
        }
        environ
    }
}

/// Deprecated top-level `branches` filter; ignored for tags and deployments
fn branch_filter_matches(workflow: &Workflow, metadata: &Metadata) -> bool {
    match &workflow.branches {
        Some(branches) if !matches!(metadata.curr.event, Event::Tag | Event::Deployment) => {
            branches.matches(&metadata.curr.commit.branch)
        }
        _ => true,
    }
}

/// `.stagecraft/build.yaml` becomes `build`, `.stagecraft.yml` becomes
/// `stagecraft`
pub fn workflow_name(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    let base = base
        .strip_suffix(".yml")
        .or_else(|| base.strip_suffix(".yaml"))
        .unwrap_or(base);
    base.strip_prefix('.').unwrap_or(base).to_string()
}

/// Drop items depending on workflows that do not exist, until nothing changes
fn prune_missing_dependencies(mut items: Vec<PipelineItem>) -> Vec<PipelineItem> {
    loop {
        let names: HashSet<String> = items.iter().map(|i| i.workflow.name.clone()).collect();
        let before = items.len();
        items.retain(|item| {
            let missing: Vec<&String> = item
                .depends_on
                .iter()
                .filter(|d| !names.contains(*d))
                .collect();
            if missing.is_empty() {
                return true;
            }
            warn!(
                workflow = %item.workflow.name,
                missing = ?missing,
                "dropping workflow with missing dependencies"
            );
            false
        });
        if items.len() == before {
            return items;
        }
    }
}
