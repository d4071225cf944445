// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Workflow compiler
//!
//! Turns one parsed [`Workflow`] plus run-time [`Metadata`] into a backend
//! [`Config`]: implicit clone and cache steps are synthesized, every step
//! that matches its condition is resolved (image, environment, secrets,
//! registry credentials, limits, script) and the scheduler orders the
//! result into stages.

mod cacher;
mod image;
mod script;
mod secret;
mod settings;

pub use cacher::{Cacher, VolumeCacher};
pub use image::{expand_image, match_hostname, match_image, trim_image, ImageRef};
pub use secret::{registry_for, Registry, Secret, SecretStore};
pub use settings::params_to_env;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::backend::{Auth, Config, Conn, Network, Stage, Step, StepType, Volume};
use crate::errors::StagecraftResult;
use crate::metadata::{Event, Metadata};
use crate::pipeline::{Container, DagNode, Params, SettingValue, StageScheduler, Workflow, Workspace};

/// Image used for the synthesized clone step
pub const DEFAULT_CLONE_IMAGE: &str = "docker.io/woodpeckerci/plugin-git:latest";

/// Workspace base used when neither the workflow nor the operator sets one
pub const DEFAULT_WORKSPACE_BASE: &str = "/stagecraft";

/// Plugin images that run privileged
pub const DEFAULT_ESCALATE: [&str; 4] = [
    "docker.io/woodpeckerci/plugin-docker-buildx",
    "docker.io/plugins/docker",
    "plugins/docker",
    "woodpeckerci/plugin-docker-buildx",
];

/// Operator resource limits; non-zero values override the step's own
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub mem_limit: i64,
    pub memswap_limit: i64,
    pub shm_size: i64,
    pub cpu_quota: i64,
    pub cpu_shares: i64,
    pub cpu_set: String,
}

impl ResourceLimits {
    fn apply(&self, step: &mut Step) {
        let layer = |global: i64, local: i64| if global != 0 { global } else { local };
        step.mem_limit = layer(self.mem_limit, step.mem_limit);
        step.memswap_limit = layer(self.memswap_limit, step.memswap_limit);
        step.shm_size = layer(self.shm_size, step.shm_size);
        step.cpu_quota = layer(self.cpu_quota, step.cpu_quota);
        step.cpu_shares = layer(self.cpu_shares, step.cpu_shares);
        if !self.cpu_set.is_empty() {
            step.cpu_set = self.cpu_set.clone();
        }
    }
}

/// Proxy settings exported to every step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyOptions {
    pub http: String,
    pub https: String,
    pub no_proxy: String,
}

impl ProxyOptions {
    fn apply(&self, env: &mut BTreeMap<String, String>) {
        for (key, value) in [
            ("HTTP_PROXY", &self.http),
            ("HTTPS_PROXY", &self.https),
            ("NO_PROXY", &self.no_proxy),
        ] {
            if value.is_empty() {
                continue;
            }
            env.insert(key.to_string(), value.clone());
            env.insert(key.to_lowercase(), value.clone());
        }
    }
}

/// Credentials written to `.netrc` inside clone steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Netrc {
    pub machine: String,
    pub username: String,
    pub password: String,
}

/// Everything the compiler needs besides the workflow and its metadata
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Unique prefix for container, volume and network names
    pub prefix: String,
    /// Local mode: no clone, no workspace volume
    pub local: bool,
    /// Whether the repository is trusted
    pub trusted: bool,
    pub escalate: Vec<String>,
    pub default_clone_image: String,
    pub limits: ResourceLimits,
    /// Extra volumes mounted into every step
    pub volumes: Vec<String>,
    /// Extra networks every step joins
    pub networks: Vec<String>,
    pub workspace: Workspace,
    pub proxy: ProxyOptions,
    pub netrc: Option<Netrc>,
    pub netrc_only_trusted: bool,
    pub secrets: Vec<Secret>,
    pub registries: Vec<Registry>,
    /// Global environment; metadata and step values take precedence
    pub env: BTreeMap<String, String>,
    pub cacher: Option<Arc<dyn Cacher>>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            prefix: "stagecraft".into(),
            local: false,
            trusted: false,
            escalate: DEFAULT_ESCALATE.iter().map(|s| s.to_string()).collect(),
            default_clone_image: DEFAULT_CLONE_IMAGE.into(),
            limits: ResourceLimits::default(),
            volumes: Vec::new(),
            networks: Vec::new(),
            workspace: Workspace::default(),
            proxy: ProxyOptions::default(),
            netrc: None,
            netrc_only_trusted: true,
            secrets: Vec::new(),
            registries: Vec::new(),
            env: BTreeMap::new(),
            cacher: None,
        }
    }
}

impl CompilerOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Per-compilation state
struct Context<'a> {
    metadata: &'a Metadata,
    /// Environment visible to `evaluate` conditions
    env: BTreeMap<String, String>,
    base: String,
    path: String,
    platform: String,
    next_id: usize,
}

impl Context<'_> {
    fn workspace(&self) -> String {
        join_path(&self.base, &self.path)
    }
}

/// Workflow compiler
#[derive(Debug, Clone)]
pub struct Compiler {
    options: CompilerOptions,
    secrets: SecretStore,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        let secrets = SecretStore::new(&options.secrets);
        Self { options, secrets }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile a workflow; a non-matching workflow condition yields an empty
    /// config
    pub fn compile(&self, workflow: &Workflow, metadata: &Metadata) -> StagecraftResult<Config> {
        let env = self.condition_env(metadata);
        if !workflow.when.matches(metadata, true, &env)? {
            debug!(workflow = %metadata.workflow.name, "workflow condition does not match");
            return Ok(Config::default());
        }
        self.compile_steps(workflow, metadata)
    }

    /// Compile a workflow without evaluating its top-level condition
    pub fn compile_steps(&self, workflow: &Workflow, metadata: &Metadata) -> StagecraftResult<Config> {
        let mut ctx = self.context(workflow, metadata);
        let mut config = Config::default();

        let default_name = format!("{}_default", self.options.prefix);
        config.networks.push(Network {
            name: default_name.clone(),
        });
        if !self.options.local {
            config.volumes.push(Volume { name: default_name });
        }

        if !workflow.skip_clone && !self.options.local {
            for step in self.clone_steps(workflow, &mut ctx)? {
                config.stages.push(Stage { steps: vec![step] });
            }
        }

        let cacher = self
            .options
            .cacher
            .as_ref()
            .filter(|_| !workflow.cache.is_empty() && !self.options.local);
        let repo = metadata.repo.full_name();
        let branch = &metadata.curr.commit.branch;

        if let Some(cacher) = cacher {
            let restore = cacher.restore(&repo, branch, &workflow.cache);
            let step = self.create_process(&restore, StepType::Cache, &mut ctx)?;
            config.stages.push(Stage { steps: vec![step] });
        }

        let mut services = Vec::new();
        for container in workflow.services.iter() {
            if !self.applies(container, &ctx)? {
                continue;
            }
            let step = self.create_process(container, StepType::Service, &mut ctx)?;
            services.push(DagNode::from_container(container, step));
        }

        let mut steps = Vec::new();
        for container in workflow.steps.iter() {
            if !self.applies(container, &ctx)? {
                debug!(step = %container.name, "step condition does not match");
                continue;
            }
            let step_type = if container.is_plugin() {
                StepType::Plugin
            } else {
                StepType::Commands
            };
            let step = self.create_process(container, step_type, &mut ctx)?;
            steps.push(DagNode::from_container(container, step));
        }

        for stage in StageScheduler::schedule(steps, services)? {
            config.stages.push(Stage { steps: stage });
        }

        if let Some(cacher) = cacher {
            if metadata.curr.event == Event::Push {
                let rebuild = cacher.rebuild(&repo, branch, &workflow.cache);
                let step = self.create_process(&rebuild, StepType::Cache, &mut ctx)?;
                config.stages.push(Stage { steps: vec![step] });
            }
        }

        Ok(config)
    }

    fn context<'a>(&self, workflow: &Workflow, metadata: &'a Metadata) -> Context<'a> {
        let pick = |values: [&str; 2], fallback: String| {
            values
                .into_iter()
                .find(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or(fallback)
        };

        Context {
            metadata,
            env: self.condition_env(metadata),
            base: pick(
                [workflow.workspace.base.as_str(), self.options.workspace.base.as_str()],
                DEFAULT_WORKSPACE_BASE.to_string(),
            ),
            path: pick(
                [workflow.workspace.path.as_str(), self.options.workspace.path.as_str()],
                metadata.repo.full_name(),
            ),
            platform: pick(
                [
                    workflow.labels.get("platform").map(String::as_str).unwrap_or(""),
                    workflow.platform.as_str(),
                ],
                metadata.sys.platform.clone(),
            ),
            next_id: 0,
        }
    }

    fn condition_env(&self, metadata: &Metadata) -> BTreeMap<String, String> {
        let mut env = metadata.environ();
        for (key, value) in &self.options.env {
            env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        env
    }

    fn applies(&self, container: &Container, ctx: &Context<'_>) -> StagecraftResult<bool> {
        if self.options.local && !container.when.runs_locally() {
            return Ok(false);
        }
        container.when.matches(ctx.metadata, false, &ctx.env)
    }

    fn clone_steps(&self, workflow: &Workflow, ctx: &mut Context<'_>) -> StagecraftResult<Vec<Step>> {
        if workflow.clone.is_empty() {
            let mut settings = vec![("depth".to_string(), SettingValue::Scalar("0".into()))];
            if ctx.metadata.curr.event == Event::Tag {
                settings.push(("tags".to_string(), SettingValue::Scalar("true".into())));
            }
            let container = Container {
                name: "clone".into(),
                image: self.options.default_clone_image.clone(),
                settings: Params(settings),
                ..Default::default()
            };
            return Ok(vec![self.create_process(&container, StepType::Clone, ctx)?]);
        }

        let mut steps = Vec::new();
        for container in workflow.clone.iter() {
            if !container.when.matches(ctx.metadata, false, &ctx.env)? {
                continue;
            }
            steps.push(self.create_process(container, StepType::Clone, ctx)?);
        }
        Ok(steps)
    }

    /// Resolve one declared container into a backend step
    fn create_process(
        &self,
        container: &Container,
        step_type: StepType,
        ctx: &mut Context<'_>,
    ) -> StagecraftResult<Step> {
        let options = &self.options;
        let event = ctx.metadata.curr.event;
        let workspace = ctx.workspace();
        let image = expand_image(&container.image);

        let mut environment = options.env.clone();

        let mut metadata = ctx.metadata.clone();
        metadata.step.name = container.name.clone();
        environment.extend(metadata.environ());
        environment.insert("CI_WORKSPACE".into(), workspace.clone());
        options.proxy.apply(&mut environment);

        let resolve = |name: &str| self.secrets.value(name, event, container);
        params_to_env(&container.environment, &mut environment, "", false, &resolve)?;
        if matches!(step_type, StepType::Plugin | StepType::Clone | StepType::Cache) {
            params_to_env(&container.settings, &mut environment, "PLUGIN_", true, &resolve)?;
        }
        for secret in &container.secrets {
            let value = self.secrets.value(&secret.source, event, container)?;
            environment.insert(secret.target.to_uppercase(), value);
        }

        if let Some(netrc) = &options.netrc {
            let allowed = if step_type == StepType::Clone {
                !options.netrc_only_trusted || options.trusted
            } else {
                options.trusted
            };
            if allowed {
                environment.insert("CI_NETRC_MACHINE".into(), netrc.machine.clone());
                environment.insert("CI_NETRC_USERNAME".into(), netrc.username.clone());
                environment.insert("CI_NETRC_PASSWORD".into(), netrc.password.clone());
            }
        }

        let mut entrypoint = container.entrypoint.clone();
        let mut commands = Vec::new();
        if !container.commands.is_empty() {
            let script = script::generate(&ctx.platform, &container.commands);
            if entrypoint.is_empty() {
                entrypoint = script.entrypoint;
            }
            commands = script.commands;
            environment.extend(script.environment);
        }

        let mut privileged = container.privileged;
        if step_type == StepType::Plugin && match_image(&image, &options.escalate) {
            privileged = true;
            entrypoint.clear();
            commands.clear();
        }

        let working_dir = if step_type == StepType::Clone {
            workspace.clone()
        } else if container.directory.starts_with('/') {
            container.directory.clone()
        } else {
            join_path(&workspace, &container.directory)
        };

        let mut volumes = Vec::new();
        if !options.local {
            volumes.push(format!("{}_default:{}", options.prefix, ctx.base));
        }
        volumes.extend(options.volumes.iter().cloned());
        volumes.extend(container.volumes.iter().cloned());

        let mut networks = vec![Conn {
            name: format!("{}_default", options.prefix),
            aliases: vec![container.name.clone()],
        }];
        for name in options.networks.iter().chain(container.networks.iter()) {
            networks.push(Conn {
                name: name.clone(),
                aliases: Vec::new(),
            });
        }

        let auth_config = registry_for(&options.registries, &image).map(|r| Auth {
            username: r.username.clone(),
            password: r.password.clone(),
        });

        ctx.next_id += 1;
        let mut step = Step {
            name: container.name.clone(),
            uuid: format!("{}_step_{}", options.prefix, ctx.next_id),
            step_type,
            image,
            pull: container.pull,
            detached: step_type == StepType::Service || container.detach,
            privileged,
            working_dir,
            environment,
            entrypoint,
            commands,
            extra_hosts: container.extra_hosts.clone(),
            volumes,
            tmpfs: container.tmpfs.clone(),
            devices: container.devices.clone(),
            networks,
            dns: container.dns.clone(),
            dns_search: container.dns_search.clone(),
            network_mode: container.network_mode.clone(),
            ports: container.ports.clone(),
            mem_limit: container.mem_limit,
            memswap_limit: container.memswap_limit,
            shm_size: container.shm_size,
            cpu_quota: container.cpu_quota,
            cpu_shares: container.cpu_shares,
            cpu_set: container.cpu_set.clone(),
            auth_config,
            on_success: container.when.includes_status_success(),
            on_failure: container.when.includes_status_failure(),
            failure: container.failure,
        };
        options.limits.apply(&mut step);

        Ok(step)
    }
}

fn join_path(left: &str, right: &str) -> String {
    let right = right.trim_matches('/');
    if right.is_empty() {
        return left.to_string();
    }
    format!("{}/{}", left.trim_end_matches('/'), right)
}
