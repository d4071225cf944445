// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Lint command - check a workflow file

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{read_workflow_file, substitute_variant};
use crate::matrix;
use crate::pipeline::{Linter, Workflow};

/// Run the lint command
pub async fn run(file: PathBuf, trusted: bool, verbose: bool) -> Result<()> {
    println!("{}", format!("Linting {}...", file.display()).bold());
    println!();

    let data = read_workflow_file(&file)?;
    let axes = matrix::expand(&data)?;
    let linter = Linter::new(trusted);

    let mut errors = 0;
    let mut warnings = 0;

    for axis in &axes {
        let label = if axis.is_empty() {
            String::new()
        } else {
            format!(" [{}]", axis)
        };

        let substituted = substitute_variant(&data, axis)?;
        let workflow = match Workflow::from_yaml(&substituted) {
            Ok(w) => w,
            Err(e) => {
                eprintln!("  {} Failed to parse workflow{}", "✗".red(), label);
                eprintln!();
                return Err(e.into());
            }
        };

        let report = linter.check(&workflow);
        for issue in report.errors() {
            errors += 1;
            println!("  {} {}{}", "✗".red(), issue, label.dimmed());
        }
        for issue in report.warnings() {
            warnings += 1;
            println!("  {} {}{}", "⚠".yellow(), issue, label.dimmed());
        }

        if verbose {
            println!(
                "  {} {} step(s), {} service(s){}",
                "→".blue(),
                workflow.steps.len(),
                workflow.services.len(),
                label.dimmed()
            );
        }
    }

    println!();
    if errors > 0 {
        Err(miette::miette!("Workflow has {} lint error(s)", errors))
    } else if warnings > 0 {
        println!("{}", "Workflow is valid but has warnings.".yellow().bold());
        Ok(())
    } else {
        println!("{}", "Workflow is valid!".green().bold());
        Ok(())
    }
}
