// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Workflow definitions and scheduling
//!
//! This module defines the parsed form of a workflow file (steps, services,
//! conditions, settings), the linter that checks it, and the scheduler that
//! turns its dependency declarations into ordered stages.

mod container;
mod dag;
mod definition;
mod settings;
mod validation;

pub use container::{parse_byte_size, Container, ContainerList, FailurePolicy, SecretRef};
pub use dag::{find_cycle, DagNode, DependencyGraph, StageScheduler};
pub use definition::{Workflow, Workspace};
pub use settings::{Params, SettingValue};
pub use validation::{LintReport, Linter};
