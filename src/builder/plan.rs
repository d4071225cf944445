// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Step numbering across a built event

use serde::Serialize;

use super::{PipelineItem, State, WorkflowRecord};
use crate::backend::StepType;

/// Placeholder record of one compiled step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub pid: usize,
    /// pid of the owning workflow
    pub ppid: usize,
    pub name: String,
    pub uuid: String,
    pub state: State,
    #[serde(rename = "type")]
    pub step_type: StepType,
}

/// A workflow record with its steps
#[derive(Debug, Clone, Serialize)]
pub struct PlannedWorkflow {
    #[serde(flatten)]
    pub workflow: WorkflowRecord,
    pub children: Vec<StepRecord>,
}

/// Workflows of one event with their numbered steps
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelinePlan {
    pub workflows: Vec<PlannedWorkflow>,
}

impl PipelinePlan {
    /// Number every step after the highest workflow pid and record it
    ///
    /// Steps of skipped workflows are skipped as well. Each compiled step
    /// receives its number as `CI_STEP_NUMBER`.
    pub fn assign(items: &mut [PipelineItem]) -> Self {
        let mut sequence = items.iter().map(|i| i.workflow.pid).max().unwrap_or(0);
        let mut plan = PipelinePlan::default();

        for item in items.iter_mut() {
            let state = item.workflow.state;
            let ppid = item.workflow.pid;
            let mut children = Vec::new();

            for step in item.config.steps_mut() {
                sequence += 1;
                step.environment
                    .insert("CI_STEP_NUMBER".into(), sequence.to_string());
                children.push(StepRecord {
                    pid: sequence,
                    ppid,
                    name: step.name.clone(),
                    uuid: step.uuid.clone(),
                    state,
                    step_type: step.step_type,
                });
            }

            plan.workflows.push(PlannedWorkflow {
                workflow: item.workflow.clone(),
                children,
            });
        }

        plan
    }

    /// Total number of steps
    pub fn step_count(&self) -> usize {
        self.workflows.iter().map(|w| w.children.len()).sum()
    }
}
