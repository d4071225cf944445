// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Aggregated linter findings

use serde::Serialize;
use std::fmt;

/// A single linter finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintIssue {
    /// Dotted path of the offending field, e.g. `steps.build.privileged`
    pub field: String,
    /// Human readable description
    pub message: String,
    /// Warnings are reported but never block compilation
    pub warning: bool,
}

impl LintIssue {
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            warning: false,
        }
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            warning: true,
        }
    }
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "[{}] {}", self.field, self.message)
        }
    }
}

/// One or more blocking linter findings, combined into a single error value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintErrors {
    pub issues: Vec<LintIssue>,
}

impl LintErrors {
    pub fn new(issues: Vec<LintIssue>) -> Self {
        Self { issues }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }
}

impl fmt::Display for LintErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.issues.as_slice() {
            [] => write!(f, "Linter reported no issues"),
            [single] => write!(f, "Linter error: {}", single),
            many => {
                write!(f, "Linter found {} errors:", many.len())?;
                for issue in many {
                    write!(f, "\n  - {}", issue)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for LintErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_issue_display() {
        let errs = LintErrors::new(vec![LintIssue::error("steps.build.image", "Invalid or missing image")]);
        assert_eq!(
            errs.to_string(),
            "Linter error: [steps.build.image] Invalid or missing image"
        );
    }

    #[test]
    fn test_multiple_issues_are_listed() {
        let errs = LintErrors::new(vec![
            LintIssue::error("steps.a.image", "missing"),
            LintIssue::error("steps.b.privileged", "insufficient privileges"),
        ]);
        let text = errs.to_string();
        assert!(text.starts_with("Linter found 2 errors:"));
        assert!(text.contains("steps.b.privileged"));
    }
}
