// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Error types
//!
//! Every failure the compiler can surface to a pipeline author or operator
//! is a variant of [`StagecraftError`]. Variants carry enough context (step,
//! dependency, cycle path, file and matrix axis) to be actionable without
//! reading the compiler's source.

mod lint;

pub use lint::{LintErrors, LintIssue};

use miette::Diagnostic;
use thiserror::Error;

/// Result type for stagecraft operations
pub type StagecraftResult<T> = Result<T, StagecraftError>;

/// Main error type for stagecraft
#[derive(Error, Debug, Diagnostic)]
pub enum StagecraftError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration source errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("No pipeline configuration found (tried: {})", .tried.join(", "))]
    #[diagnostic(
        code(stagecraft::config_not_found),
        help("Create a .stagecraft.yaml file or a .stagecraft/ directory with workflow files")
    )]
    ConfigNotFound { tried: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Author errors (broken pipeline configuration)
    // ─────────────────────────────────────────────────────────────────────────
    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(stagecraft::yaml_error))]
    Yaml { message: String },

    #[error("Variable substitution failed: {message}")]
    #[diagnostic(
        code(stagecraft::substitution_error),
        help("Use '$$' to write a literal '$' and close every '${{' with '}}'")
    )]
    Substitution { message: String },

    #[error("Invalid matrix: {message}")]
    #[diagnostic(
        code(stagecraft::matrix_error),
        help("A matrix maps axis names to lists of values, or holds an 'include' list of assignments")
    )]
    Matrix { message: String },

    #[error("{0}")]
    #[diagnostic(code(stagecraft::lint))]
    Lint(LintErrors),

    #[error("Invalid evaluate expression '{expression}': {reason}")]
    #[diagnostic(code(stagecraft::invalid_expression))]
    InvalidExpression { expression: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduling errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    #[diagnostic(
        code(stagecraft::unknown_dependency),
        help("Check that '{dependency}' is declared in the same section and matches the event")
    )]
    UnknownDependency { step: String, dependency: String },

    #[error("Step '{step}' needs unknown service '{service}'")]
    #[diagnostic(
        code(stagecraft::unknown_service),
        help("Check that '{service}' is declared under 'services'")
    )]
    UnknownService { step: String, service: String },

    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    #[diagnostic(
        code(stagecraft::circular_dependency),
        help("Review your step dependencies to remove the cycle")
    )]
    CircularDependency { path: Vec<String> },

    #[error("Circular dependency between workflows: {}", .path.join(" -> "))]
    #[diagnostic(
        code(stagecraft::workflow_cycle),
        help("Review the 'depends_on' lists of your workflow files")
    )]
    WorkflowCycle { path: Vec<String> },

    #[error("Pipeline has no startpoint: every workflow was skipped")]
    #[diagnostic(
        code(stagecraft::no_startpoint),
        help("Check the 'when' conditions of your workflows against the triggering event")
    )]
    NoStartpoint,

    // ─────────────────────────────────────────────────────────────────────────
    // Secret errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Secret '{name}' not found")]
    #[diagnostic(code(stagecraft::secret_not_found))]
    SecretNotFound { name: String },

    #[error("Secret '{name}' is not available: {reason}")]
    #[diagnostic(code(stagecraft::secret_not_allowed))]
    SecretNotAllowed { name: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Orchestration
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Workflow '{file}'{}: {source}", axis_suffix(.axis))]
    #[diagnostic(code(stagecraft::workflow))]
    Workflow {
        file: String,
        axis: String,
        #[source]
        source: Box<StagecraftError>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(stagecraft::io_error))]
    Io { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(stagecraft::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(stagecraft::toml_error))]
    Toml { message: String },
}

fn axis_suffix(axis: &str) -> String {
    if axis.is_empty() {
        String::new()
    } else {
        format!(" [{}]", axis)
    }
}

impl From<std::io::Error> for StagecraftError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for StagecraftError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for StagecraftError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for StagecraftError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<LintErrors> for StagecraftError {
    fn from(e: LintErrors) -> Self {
        Self::Lint(e)
    }
}

impl StagecraftError {
    /// Attach the originating workflow file and matrix axis
    pub fn in_workflow(self, file: &str, axis: &str) -> Self {
        Self::Workflow {
            file: file.to_string(),
            axis: axis.to_string(),
            source: Box::new(self),
        }
    }

    /// Whether this error was caused by the pipeline author's configuration
    /// rather than by the operator's setup or the environment
    pub fn is_config_error(&self) -> bool {
        match self {
            Self::Yaml { .. }
            | Self::Substitution { .. }
            | Self::Matrix { .. }
            | Self::Lint(_)
            | Self::InvalidExpression { .. }
            | Self::UnknownDependency { .. }
            | Self::UnknownService { .. }
            | Self::CircularDependency { .. }
            | Self::WorkflowCycle { .. }
            | Self::NoStartpoint
            | Self::SecretNotFound { .. }
            | Self::SecretNotAllowed { .. } => true,
            Self::Workflow { source, .. } => source.is_config_error(),
            Self::ConfigNotFound { .. }
            | Self::Io { .. }
            | Self::Json { .. }
            | Self::Toml { .. } => false,
        }
    }
}
