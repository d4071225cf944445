// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! stagecraft - Pipeline compiler and stage scheduler
//!
//! Compile workflow files plus commit metadata into ordered execution plans.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagecraft::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, plans to stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagecraft=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    match cli.command {
        Commands::Compile {
            path,
            event,
            trusted,
            local,
            env,
            format,
        } => {
            stagecraft::cli::compile::run(
                &cli.config,
                path,
                event,
                trusted,
                local,
                env,
                format,
                cli.verbose,
            )
            .await
        }
        Commands::Lint { file, trusted } => {
            stagecraft::cli::lint::run(file, trusted, cli.verbose).await
        }
        Commands::Graph { file, format } => {
            stagecraft::cli::graph::run(file, format, cli.verbose).await
        }
        Commands::Matrix { file, format } => {
            stagecraft::cli::matrix::run(file, format, cli.verbose).await
        }
    }
}
