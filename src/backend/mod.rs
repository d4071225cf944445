// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Execution plan handed to the execution backend
//!
//! A [`Config`] is an ordered list of stages; stages run one after another
//! and the steps inside a stage run concurrently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::FailurePolicy;

/// Compiled execution plan for one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub volumes: Vec<Volume>,
    pub networks: Vec<Network>,
    pub stages: Vec<Stage>,
}

impl Config {
    /// Iterate every step across all stages, in execution order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(|s| s.steps.iter())
    }

    pub fn steps_mut(&mut self) -> impl Iterator<Item = &mut Step> {
        self.stages.iter_mut().flat_map(|s| s.steps.iter_mut())
    }
}

/// Steps that run concurrently
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub steps: Vec<Step>,
}

/// Volume created for the duration of one workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
}

/// Network created for the duration of one workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
}

/// Kind of compiled step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Clone,
    Service,
    Plugin,
    #[default]
    Commands,
    Cache,
}

/// Registry credentials attached to a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub username: String,
    pub password: String,
}

/// Network attachment with optional aliases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conn {
    pub name: String,
    pub aliases: Vec<String>,
}

/// One fully resolved step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Unique container name (compilation prefix + step name)
    pub uuid: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub image: String,
    pub pull: bool,
    pub detached: bool,
    pub privileged: bool,
    pub working_dir: String,
    pub environment: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    pub commands: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub volumes: Vec<String>,
    pub tmpfs: Vec<String>,
    pub devices: Vec<String>,
    pub networks: Vec<Conn>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub network_mode: String,
    pub ports: Vec<String>,
    pub mem_limit: i64,
    pub memswap_limit: i64,
    pub shm_size: i64,
    pub cpu_quota: i64,
    pub cpu_shares: i64,
    pub cpu_set: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<Auth>,
    pub on_success: bool,
    pub on_failure: bool,
    pub failure: FailurePolicy,
}
