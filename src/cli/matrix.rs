// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Matrix command - list the variants of a workflow file

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use super::{read_workflow_file, OutputFormat};
use crate::matrix;

/// Run the matrix command
pub async fn run(file: PathBuf, format: OutputFormat, _verbose: bool) -> Result<()> {
    let data = read_workflow_file(&file)?;
    let axes = matrix::expand(&data)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&axes).into_diagnostic()?);
        }
        OutputFormat::Text => {
            if axes.iter().all(|a| a.is_empty()) {
                println!("{}", "No matrix declared".dimmed());
                return Ok(());
            }
            for (i, axis) in axes.iter().enumerate() {
                println!("{:>3}. {}", i + 1, axis);
            }
        }
    }

    Ok(())
}
