// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Graph command - visualize the stages of a workflow

use miette::Result;
use std::path::PathBuf;

use super::{read_workflow_file, substitute_variant, GraphFormat};
use crate::matrix;
use crate::pipeline::{DependencyGraph, Workflow};

/// Run the graph command
///
/// Files with a matrix are rendered for their first variant.
pub async fn run(file: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let data = read_workflow_file(&file)?;
    let axis = matrix::expand(&data)?.into_iter().next().unwrap_or_default();

    let workflow = Workflow::from_yaml(&substitute_variant(&data, &axis)?)?;
    let graph = DependencyGraph::build(&workflow)?;

    let output = match format {
        GraphFormat::Text => graph.to_text(),
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    print!("{}", output);

    Ok(())
}
