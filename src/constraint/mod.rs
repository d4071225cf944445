// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Condition evaluation
//!
//! A `when` block is a disjunction of constraints; each constraint is a
//! conjunction of matchers over the run-time metadata. Evaluation is pure:
//! the same inputs always produce the same answer.

mod evaluate;
mod list;
mod path;

pub use evaluate::evaluate;
pub use list::{List, Map};
pub use path::PathFilter;

use glob::{MatchOptions, Pattern};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::StagecraftResult;
use crate::metadata::{Event, Metadata};

const STATUS_SUCCESS: &str = "success";
const STATUS_FAILURE: &str = "failure";

/// Glob match where `*` stays inside one path segment and `**` crosses them
///
/// Patterns that fail to compile fall back to literal comparison.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    match Pattern::new(pattern) {
        Ok(compiled) => compiled.matches_with(value, options),
        Err(_) => pattern == value,
    }
}

/// A `when` block: any constraint may match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct When {
    pub constraints: Vec<Constraint>,
}

impl When {
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// `global` conditions belong to a whole workflow and ignore the matrix
    /// filter.
    pub fn matches(
        &self,
        metadata: &Metadata,
        global: bool,
        env: &BTreeMap<String, String>,
    ) -> StagecraftResult<bool> {
        for constraint in &self.constraints {
            if constraint.matches(metadata, global, env)? {
                return Ok(true);
            }
        }
        Ok(self.is_empty())
    }

    /// Whether the step runs after a successful pipeline so far
    pub fn includes_status_success(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        self.constraints.iter().any(|c| {
            c.status.is_empty() || c.status.include.iter().any(|s| s == STATUS_SUCCESS)
        })
    }

    /// Whether the step runs after a failure earlier in the pipeline
    pub fn includes_status_failure(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.status.include.iter().any(|s| s == STATUS_FAILURE))
    }

    /// Whether the step is allowed to run in local mode
    pub fn runs_locally(&self) -> bool {
        self.constraints.iter().all(|c| c.local.unwrap_or(true))
    }

    /// Event names referenced by any constraint
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.constraints
            .iter()
            .flat_map(|c| c.event.include.iter().chain(c.event.exclude.iter()))
            .map(String::as_str)
    }
}

impl<'de> Deserialize<'de> for When {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WhenVisitor)
    }
}

struct WhenVisitor;

impl<'de> Visitor<'de> for WhenVisitor {
    type Value = When;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a constraint mapping or a list of constraint mappings")
    }

    fn visit_unit<E: de::Error>(self) -> Result<When, E> {
        Ok(When::default())
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<When, A::Error> {
        let constraint = Constraint::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(When {
            constraints: vec![constraint],
        })
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<When, A::Error> {
        let mut constraints = Vec::new();
        while let Some(constraint) = seq.next_element::<Constraint>()? {
            constraints.push(constraint);
        }
        Ok(When { constraints })
    }
}

/// One set of matchers; all of them must match
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Constraint {
    #[serde(rename = "ref")]
    pub reference: List,
    pub repo: List,
    pub instance: List,
    pub platform: List,
    pub environment: List,
    pub event: List,
    pub branch: List,
    pub cron: List,
    pub status: List,
    pub matrix: Map,
    pub local: Option<bool>,
    pub path: PathFilter,
    pub evaluate: String,
}

impl Constraint {
    pub fn matches(
        &self,
        m: &Metadata,
        global: bool,
        env: &BTreeMap<String, String>,
    ) -> StagecraftResult<bool> {
        let commit = &m.curr.commit;
        let event = m.curr.event;

        let mut matched = global || self.matrix.matches(&m.workflow.matrix);

        matched = matched
            && self.event_matches(event)
            && self.platform.matches(&m.sys.platform)
            && self.environment.matches(&m.curr.deploy_to)
            && self.repo.matches(&m.repo.full_name())
            && self.reference.matches(&commit.reference)
            && self.instance.matches(&m.sys.host);

        if matches!(event, Event::Push | Event::PullRequest) {
            matched = matched && self.path.matches(&commit.changed_files, &commit.message);
        }

        if event != Event::Tag {
            matched = matched && self.branch.matches(&commit.branch);
        }

        if event == Event::Cron {
            matched = matched && self.cron.matches(&m.curr.cron);
        }

        if matched && !self.evaluate.is_empty() {
            matched = evaluate(&self.evaluate, env)?;
        }

        Ok(matched)
    }

    /// Without an explicit event filter only the default events match
    fn event_matches(&self, event: Event) -> bool {
        if self.event.is_empty() {
            return Event::DEFAULT_FILTER.contains(&event);
        }
        self.event.matches(event.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Commit;

    fn push_to(branch: &str) -> Metadata {
        let mut m = Metadata::default();
        m.curr.event = Event::Push;
        m.curr.commit = Commit {
            branch: branch.into(),
            reference: format!("refs/heads/{}", branch),
            ..Default::default()
        };
        m
    }

    fn when(yaml: &str) -> When {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn no_env() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_empty_when_always_matches() {
        let w = When::default();
        assert!(w.matches(&push_to("main"), true, &no_env()).unwrap());
        assert!(w.matches(&push_to("main"), true, &no_env()).unwrap());
    }

    #[test]
    fn test_branch_filter() {
        let w = when("branch: main");
        assert!(w.matches(&push_to("main"), false, &no_env()).unwrap());
        assert!(!w.matches(&push_to("dev"), false, &no_env()).unwrap());
    }

    #[test]
    fn test_list_of_constraints_is_disjunction() {
        let w = when("- branch: main\n- branch: release/*");
        assert!(w.matches(&push_to("release/1.0"), false, &no_env()).unwrap());
        assert!(!w.matches(&push_to("dev"), false, &no_env()).unwrap());
    }

    #[test]
    fn test_default_event_filter_excludes_cron() {
        let w = when("branch: main");
        let mut m = push_to("main");
        m.curr.event = Event::Cron;
        assert!(!w.matches(&m, false, &no_env()).unwrap());

        let explicit = when("event: cron\ncron: nightly");
        m.curr.cron = "nightly".into();
        assert!(explicit.matches(&m, false, &no_env()).unwrap());
        m.curr.cron = "weekly".into();
        assert!(!explicit.matches(&m, false, &no_env()).unwrap());
    }

    #[test]
    fn test_branch_ignored_on_tag() {
        let w = when("event: tag\nbranch: main");
        let mut m = push_to("feature");
        m.curr.event = Event::Tag;
        assert!(w.matches(&m, false, &no_env()).unwrap());
    }

    #[test]
    fn test_path_only_applies_to_push_and_pull_request() {
        let w = when("event: [push, manual]\npath: 'src/**/*.rs'");
        let mut m = push_to("main");
        m.curr.commit.changed_files = vec!["docs/index.md".into()];
        assert!(!w.matches(&m, false, &no_env()).unwrap());

        m.curr.event = Event::Manual;
        assert!(w.matches(&m, false, &no_env()).unwrap());
    }

    #[test]
    fn test_matrix_only_for_step_conditions() {
        let w = when("matrix:\n  GO: '1.21'");
        let mut m = push_to("main");
        m.workflow.matrix.insert("GO".into(), "1.20".into());
        assert!(!w.matches(&m, false, &no_env()).unwrap());
        assert!(w.matches(&m, true, &no_env()).unwrap());
    }

    #[test]
    fn test_repo_and_platform() {
        let w = when("repo: acme/*\nplatform: linux/*");
        let mut m = push_to("main");
        m.repo.owner = "acme".into();
        m.repo.name = "widgets".into();
        assert!(w.matches(&m, false, &no_env()).unwrap());
        m.sys.platform = "windows/amd64".into();
        assert!(!w.matches(&m, false, &no_env()).unwrap());
    }

    #[test]
    fn test_evaluate_uses_environment() {
        let w = when(r#"evaluate: 'CI_COMMIT_BRANCH == "main"'"#);
        let m = push_to("main");
        let env = m.environ();
        assert!(w.matches(&m, false, &env).unwrap());

        let other = push_to("dev");
        assert!(!w.matches(&other, false, &other.environ()).unwrap());
    }

    #[test]
    fn test_invalid_evaluate_is_an_error() {
        let w = when("evaluate: 'CI_COMMIT_BRANCH =='");
        assert!(w.matches(&push_to("main"), false, &no_env()).is_err());
    }

    #[test]
    fn test_status_flags() {
        assert!(When::default().includes_status_success());
        assert!(!When::default().includes_status_failure());

        let w = when("status: [success, failure]");
        assert!(w.includes_status_success());
        assert!(w.includes_status_failure());

        let only_failure = when("status: failure");
        assert!(!only_failure.includes_status_success());
        assert!(only_failure.includes_status_failure());
    }

    #[test]
    fn test_local_flag() {
        assert!(When::default().runs_locally());
        assert!(when("branch: main").runs_locally());
        assert!(!when("local: false").runs_locally());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(serde_yaml::from_str::<When>("brnch: main").is_err());
    }

    #[test]
    fn test_glob_match_invalid_pattern_is_literal() {
        assert!(glob_match("[", "["));
        assert!(!glob_match("[", "x"));
    }
}
