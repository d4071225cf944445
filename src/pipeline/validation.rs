// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Workflow linting
//!
//! Rejects workflows that are structurally invalid or that request
//! privileged capabilities without being trusted.

use std::collections::HashSet;

use crate::constraint::When;
use crate::errors::{LintErrors, LintIssue, StagecraftResult};
use crate::metadata::Event;
use crate::pipeline::{Container, ContainerList, Workflow};

/// Workflow linter
#[derive(Debug, Clone, Copy, Default)]
pub struct Linter {
    trusted: bool,
}

impl Linter {
    /// Create a linter; trusted repositories may use privileged capabilities
    pub fn new(trusted: bool) -> Self {
        Self { trusted }
    }

    /// Lint a workflow, failing on any blocking issue
    ///
    /// Returns the non-blocking warnings on success.
    pub fn lint(&self, workflow: &Workflow) -> StagecraftResult<Vec<LintIssue>> {
        let report = self.check(workflow);
        if report.is_valid() {
            Ok(report.warnings().cloned().collect())
        } else {
            Err(LintErrors::new(report.errors().cloned().collect()).into())
        }
    }

    /// Collect every issue without failing
    pub fn check(&self, workflow: &Workflow) -> LintReport {
        let mut report = LintReport::default();

        if workflow.steps.is_empty() {
            report.add(LintIssue::error("steps", "Workflow has no steps"));
        }

        self.check_when(&workflow.when, "when", &mut report);

        if workflow.branches.is_some() {
            report.add(LintIssue::warning(
                "branches",
                "'branches' is deprecated, use 'when.branch' instead",
            ));
        }
        if !workflow.platform.is_empty() {
            report.add(LintIssue::warning(
                "platform",
                "'platform' is deprecated, use 'labels.platform' instead",
            ));
        }

        for (section, list) in [
            ("clone", &workflow.clone),
            ("steps", &workflow.steps),
            ("services", &workflow.services),
        ] {
            self.check_section(section, list, &mut report);
        }

        report
    }

    fn check_section(&self, section: &str, list: &ContainerList, report: &mut LintReport) {
        for name in &list.duplicates {
            report.add(LintIssue::warning(
                format!("{}.{}", section, name),
                format!("Duplicate name '{}', only the first declaration is used", name),
            ));
        }

        for container in list.iter() {
            self.check_container(section, container, report);
        }
    }

    fn check_container(&self, section: &str, c: &Container, report: &mut LintReport) {
        let field = |name: &str| {
            if c.name.is_empty() {
                format!("{}[{}].{}", section, c.position, name)
            } else {
                format!("{}.{}.{}", section, c.name, name)
            }
        };

        if c.name.is_empty() {
            report.add(LintIssue::error(field("name"), "Missing name"));
        }
        if c.image.trim().is_empty() {
            report.add(LintIssue::error(field("image"), "Invalid or missing image"));
        }

        if !c.settings.is_empty() && !c.commands.is_empty() {
            report.add(LintIssue::error(
                field("settings"),
                "Cannot configure both 'commands' and 'settings'",
            ));
        }
        if !c.settings.is_empty() && !c.entrypoint.is_empty() {
            report.add(LintIssue::error(
                field("entrypoint"),
                "Cannot configure both 'entrypoint' and 'settings'",
            ));
        }

        if let Some(deps) = &c.depends_on {
            if deps.iter().any(|d| *d == c.name) {
                report.add(LintIssue::error(field("depends_on"), "Step cannot depend on itself"));
            }
        }
        if section == "services" {
            if let Some(needs) = &c.needs {
                if needs.iter().any(|d| *d == c.name) {
                    report.add(LintIssue::error(field("needs"), "Service cannot need itself"));
                }
            }
        }

        if !c.group.is_empty() && c.declares_dependencies() {
            report.add(LintIssue::warning(
                field("group"),
                "'group' is ignored when 'depends_on' or 'needs' is used",
            ));
        }

        self.check_when(&c.when, &field("when"), report);

        if !self.trusted {
            self.check_trusted(c, &field, report);
        }
    }

    fn check_trusted(&self, c: &Container, field: &dyn Fn(&str) -> String, report: &mut LintReport) {
        let requested = [
            ("privileged", c.privileged),
            ("network_mode", !c.network_mode.is_empty()),
            ("networks", !c.networks.is_empty()),
            ("volumes", !c.volumes.is_empty()),
            ("tmpfs", !c.tmpfs.is_empty()),
            ("devices", !c.devices.is_empty()),
            ("dns", !c.dns.is_empty()),
            ("dns_search", !c.dns_search.is_empty()),
            ("extra_hosts", !c.extra_hosts.is_empty()),
            ("shm_size", c.shm_size != 0),
        ];

        for (name, used) in requested {
            if used {
                report.add(LintIssue::error(
                    field(name),
                    format!("Insufficient privileges to use '{}'", name),
                ));
            }
        }
    }

    fn check_when(&self, when: &When, field: &str, report: &mut LintReport) {
        let mut seen = HashSet::new();
        for name in when.event_names() {
            let known = Event::ALL.iter().any(|e| glob_covers(name, e.as_str()));
            if !known && seen.insert(name.to_string()) {
                report.add(LintIssue::error(
                    format!("{}.event", field),
                    format!("Unknown event '{}'", name),
                ));
            }
        }
    }
}

/// Event filters may use globs; a pattern is known if it matches any event
fn glob_covers(pattern: &str, event: &str) -> bool {
    crate::constraint::glob_match(pattern, event)
}

/// Outcome of [`Linter::check`]
#[derive(Debug, Clone, Default)]
pub struct LintReport {
    pub issues: Vec<LintIssue>,
}

impl LintReport {
    pub fn add(&mut self, issue: LintIssue) {
        self.issues.push(issue);
    }

    pub fn errors(&self) -> impl Iterator<Item = &LintIssue> {
        self.issues.iter().filter(|i| !i.warning)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LintIssue> {
        self.issues.iter().filter(|i| i.warning)
    }

    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StagecraftError;

    fn lint(yaml: &str, trusted: bool) -> StagecraftResult<Vec<LintIssue>> {
        Linter::new(trusted).lint(&Workflow::from_yaml(yaml).unwrap())
    }

    fn errors_of(result: StagecraftResult<Vec<LintIssue>>) -> Vec<LintIssue> {
        match result {
            Err(StagecraftError::Lint(errs)) => errs.issues,
            other => panic!("expected lint error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_workflow() {
        let warnings = lint("steps:\n  build:\n    image: rust\n    commands: cargo build\n", false).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_missing_steps() {
        let errs = errors_of(lint("services:\n  db:\n    image: postgres\n", false));
        assert_eq!(errs[0].field, "steps");
    }

    #[test]
    fn test_missing_image_and_name() {
        let errs = errors_of(lint("steps:\n  - commands: [make]\n", false));
        let fields: Vec<&str> = errs.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"steps[0].name"));
        assert!(fields.contains(&"steps[0].image"));
    }

    #[test]
    fn test_commands_and_settings_conflict() {
        let errs = errors_of(lint(
            "steps:\n  p:\n    image: plugins/s3\n    commands: ls\n    settings:\n      bucket: b\n",
            false,
        ));
        assert_eq!(errs[0].field, "steps.p.settings");
    }

    #[test]
    fn test_untrusted_privileges() {
        let yaml = "steps:\n  dind:\n    image: docker:dind\n    privileged: true\n    volumes: [/var/run/docker.sock:/var/run/docker.sock]\n";
        let errs = errors_of(lint(yaml, false));
        assert_eq!(errs.len(), 2);
        assert!(errs[0].message.contains("privileged"));

        assert!(lint(yaml, true).is_ok());
    }

    #[test]
    fn test_unknown_event() {
        let errs = errors_of(lint(
            "steps:\n  a:\n    image: alpine\n    commands: ls\n    when:\n      event: pushh\n",
            false,
        ));
        assert_eq!(errs[0].field, "steps.a.when.event");
        assert!(errs[0].message.contains("pushh"));
    }

    #[test]
    fn test_self_dependency() {
        let errs = errors_of(lint(
            "steps:\n  a:\n    image: alpine\n    commands: ls\n    depends_on: [a]\n",
            false,
        ));
        assert_eq!(errs[0].field, "steps.a.depends_on");
    }

    #[test]
    fn test_warnings_do_not_block() {
        let yaml = "branches: main\nsteps:\n  - name: a\n    image: alpine\n    commands: ls\n    group: g\n    depends_on: []\n  - name: a\n    image: alpine\n    commands: ls\n";
        let warnings = lint(yaml, false).unwrap();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().all(|w| w.warning));
    }
}
