// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! # stagecraft - Pipeline compiler and stage scheduler
//!
//! `stagecraft` turns declarative workflow files plus the metadata of a
//! triggering event into backend-neutral execution plans for container-based
//! CI/CD.
//!
//! ## Features
//!
//! - **Matrix expansion** - One workflow file fans out into many variants
//! - **Conditional execution** - `when` filters on event, branch, paths and more
//! - **Stage scheduling** - `depends_on` graphs become ordered parallel stages
//! - **Secrets and plugins** - Settings, secrets and registries resolved per step
//!
//! ## Quick Start
//!
//! ```bash
//! # Compile the workflows of a push to main
//! stagecraft compile
//!
//! # Lint a workflow
//! stagecraft lint .stagecraft/build.yaml
//!
//! # Show its stages
//! stagecraft graph .stagecraft/build.yaml --format mermaid
//! ```

pub mod backend;
pub mod builder;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod constraint;
pub mod envsubst;
pub mod errors;
pub mod matrix;
pub mod metadata;
pub mod pipeline;
pub mod source;
pub mod utils;

// Re-export commonly used types
pub use builder::{BuildOutput, PipelineBuilder, PipelineItem, PipelinePlan};
pub use compiler::{Compiler, CompilerOptions};
pub use errors::{StagecraftError, StagecraftResult};
pub use metadata::{Event, Metadata};
pub use pipeline::{Linter, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
