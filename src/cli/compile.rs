// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Compile command - build the execution plan of one event

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{parse_env, EventArgs, PlanFormat};
use crate::builder::{BuildOutput, PipelineBuilder, PipelinePlan};
use crate::config::ServerConfig;
use crate::source::{ConfigSource, FilesystemSource};

/// Plan printed by the compile command
#[derive(Serialize)]
struct CompiledEvent {
    plan: PipelinePlan,
    #[serde(flatten)]
    output: BuildOutput,
}

/// Run the compile command
#[allow(clippy::too_many_arguments)]
pub async fn run(
    config_path: &Path,
    path: Option<String>,
    event: EventArgs,
    trusted: bool,
    local: bool,
    env: Vec<String>,
    format: PlanFormat,
    verbose: bool,
) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let root = std::env::current_dir().into_diagnostic()?;
    let default_repo = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".into());

    let mut metadata = config.metadata();
    event.apply(&mut metadata, &default_repo);
    metadata.repo.trusted = trusted;

    let mut source = FilesystemSource::new(&root);
    if let Some(path) = path {
        source = source.with_path(path);
    }
    let files = source.fetch(&metadata.repo, &metadata.curr.commit).await?;

    let mut options = config.compiler_options(&unique_prefix(), trusted, local);
    options.env.extend(parse_env(&env)?);

    let mut output = PipelineBuilder::new(metadata, options).build(&files)?;
    let plan = PipelinePlan::assign(&mut output.items);

    for warning in &output.warnings {
        eprintln!(
            "  {} {}: {}",
            "⚠".yellow(),
            warning.workflow.bold(),
            warning.issue
        );
    }
    if verbose {
        eprintln!(
            "  {} {} workflow(s), {} step(s) from {} file(s)",
            "✓".green(),
            plan.workflows.len(),
            plan.step_count(),
            files.len()
        );
    }

    let compiled = CompiledEvent { plan, output };
    let rendered = match format {
        PlanFormat::Json => serde_json::to_string_pretty(&compiled).into_diagnostic()?,
        PlanFormat::Yaml => serde_yaml::to_string(&compiled).into_diagnostic()?,
    };
    println!("{}", rendered);

    Ok(())
}

/// A compilation prefix unique to this invocation
fn unique_prefix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut hasher = blake3::Hasher::new();
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());

    let hex = hasher.finalize().to_hex();
    format!("sc_{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_prefix() {
        let a = unique_prefix();
        let b = unique_prefix();
        assert!(a.starts_with("sc_"));
        assert_eq!(a.len(), 15);
        assert_ne!(a, b);
    }
}
