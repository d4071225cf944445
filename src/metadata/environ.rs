// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! The `CI_*` environment surface
//!
//! Every key is always present; unset metadata renders as an empty string
//! or `0`.

use std::collections::BTreeMap;

use super::{Event, Metadata, PipelineInfo};

/// Changed-file lists longer than this are not exported
const MAX_CHANGED_FILES: usize = 500;

const PULL_REQUEST_REF_PREFIXES: [&str; 3] =
    ["refs/pull/", "refs/merge-requests/", "refs/pull-requests/"];

pub(super) fn environ(m: &Metadata) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let mut set = |k: &str, v: String| {
        env.insert(k.to_string(), v);
    };

    let curr = &m.curr;
    let commit = &curr.commit;

    set("CI", m.sys.name.clone());

    set("CI_REPO", m.repo.full_name());
    set("CI_REPO_NAME", m.repo.name.clone());
    set("CI_REPO_OWNER", m.repo.owner.clone());
    set("CI_REPO_REMOTE_ID", m.repo.remote_id.clone());
    set("CI_REPO_SCM", "git".into());
    set("CI_REPO_URL", m.repo.forge_url.clone());
    set("CI_REPO_CLONE_URL", m.repo.clone_url.clone());
    set("CI_REPO_CLONE_SSH_URL", m.repo.clone_ssh_url.clone());
    set("CI_REPO_DEFAULT_BRANCH", m.repo.default_branch.clone());
    set("CI_REPO_PRIVATE", m.repo.private.to_string());
    set("CI_REPO_TRUSTED", m.repo.trusted.to_string());

    let (source_branch, target_branch) = if curr.event.is_pull_request() {
        split_refspec(&commit.refspec, &commit.branch)
    } else {
        (commit.branch.clone(), commit.branch.clone())
    };
    let tag = if curr.event == Event::Tag {
        commit
            .reference
            .strip_prefix("refs/tags/")
            .unwrap_or(&commit.reference)
            .to_string()
    } else {
        String::new()
    };
    let pull_request = if curr.event.is_pull_request() {
        pull_request_number(&commit.reference).unwrap_or_default()
    } else {
        String::new()
    };

    set("CI_COMMIT_SHA", commit.sha.clone());
    set("CI_COMMIT_REF", commit.reference.clone());
    set("CI_COMMIT_REFSPEC", commit.refspec.clone());
    set("CI_COMMIT_BRANCH", commit.branch.clone());
    set("CI_COMMIT_SOURCE_BRANCH", source_branch);
    set("CI_COMMIT_TARGET_BRANCH", target_branch);
    set("CI_COMMIT_TAG", tag);
    set("CI_COMMIT_PULL_REQUEST", pull_request);
    set(
        "CI_COMMIT_PULL_REQUEST_LABELS",
        commit.pull_request_labels.join(","),
    );
    set("CI_COMMIT_MESSAGE", commit.message.clone());
    set("CI_COMMIT_AUTHOR", commit.author.name.clone());
    set("CI_COMMIT_AUTHOR_EMAIL", commit.author.email.clone());
    set("CI_COMMIT_PRERELEASE", commit.is_prerelease.to_string());

    for (key, value) in pipeline_vars("CI_PIPELINE", curr, &m.sys.url, m.repo.id) {
        set(&key, value);
    }
    set("CI_PIPELINE_CRON", curr.cron.clone());
    set("CI_PIPELINE_FILES", changed_files(&commit.changed_files));

    set("CI_WORKFLOW_NAME", m.workflow.name.clone());
    set("CI_WORKFLOW_NUMBER", m.workflow.number.to_string());
    set("CI_STEP_NAME", m.step.name.clone());
    set("CI_STEP_NUMBER", m.step.number.to_string());

    let prev = &m.prev;
    set("CI_PREV_COMMIT_SHA", prev.commit.sha.clone());
    set("CI_PREV_COMMIT_REF", prev.commit.reference.clone());
    set("CI_PREV_COMMIT_REFSPEC", prev.commit.refspec.clone());
    set("CI_PREV_COMMIT_BRANCH", prev.commit.branch.clone());
    set("CI_PREV_COMMIT_MESSAGE", prev.commit.message.clone());
    set("CI_PREV_COMMIT_AUTHOR", prev.commit.author.name.clone());
    set("CI_PREV_COMMIT_AUTHOR_EMAIL", prev.commit.author.email.clone());
    for (key, value) in pipeline_vars("CI_PREV_PIPELINE", prev, &m.sys.url, m.repo.id) {
        set(&key, value);
    }

    set("CI_SYSTEM_NAME", m.sys.name.clone());
    set("CI_SYSTEM_URL", m.sys.url.clone());
    set("CI_SYSTEM_HOST", m.sys.host.clone());
    set("CI_SYSTEM_PLATFORM", m.sys.platform.clone());
    set("CI_SYSTEM_VERSION", m.sys.version.clone());
    set("CI_FORGE_TYPE", m.forge.kind.clone());
    set("CI_FORGE_URL", m.forge.url.clone());

    env
}

fn pipeline_vars(prefix: &str, p: &PipelineInfo, system_url: &str, repo_id: i64) -> Vec<(String, String)> {
    let url = if system_url.is_empty() || p.number == 0 {
        String::new()
    } else {
        format!(
            "{}/repos/{}/pipeline/{}",
            system_url.trim_end_matches('/'),
            repo_id,
            p.number
        )
    };

    vec![
        (format!("{prefix}_NUMBER"), p.number.to_string()),
        (format!("{prefix}_PARENT"), p.parent.to_string()),
        (format!("{prefix}_EVENT"), p.event.to_string()),
        (format!("{prefix}_URL"), url),
        (format!("{prefix}_FORGE_URL"), p.forge_url.clone()),
        (format!("{prefix}_DEPLOY_TARGET"), p.deploy_to.clone()),
        (format!("{prefix}_DEPLOY_TASK"), p.deploy_task.clone()),
        (format!("{prefix}_STATUS"), p.status.clone()),
        (format!("{prefix}_CREATED"), p.created.to_string()),
        (format!("{prefix}_STARTED"), p.started.to_string()),
        (format!("{prefix}_FINISHED"), p.finished.to_string()),
    ]
}

/// `source:target` refspecs name both sides of a pull request
fn split_refspec(refspec: &str, branch: &str) -> (String, String) {
    match refspec.split_once(':') {
        Some((source, target)) => (source.to_string(), target.to_string()),
        None => (String::new(), branch.to_string()),
    }
}

fn pull_request_number(reference: &str) -> Option<String> {
    let rest = PULL_REQUEST_REF_PREFIXES
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))?;
    let number: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!number.is_empty()).then_some(number)
}

fn changed_files(files: &[String]) -> String {
    if files.len() > MAX_CHANGED_FILES {
        return String::new();
    }
    serde_json::to_string(files).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Commit, Repo};

    #[test]
    fn test_unset_metadata_renders_defaults() {
        let env = Metadata::default().environ();
        assert_eq!(env["CI_COMMIT_SHA"], "");
        assert_eq!(env["CI_PIPELINE_NUMBER"], "0");
        assert_eq!(env["CI_STEP_NUMBER"], "0");
        assert_eq!(env["CI_PIPELINE_FILES"], "[]");
        assert_eq!(env["CI_PIPELINE_URL"], "");
        assert_eq!(env["CI_REPO_SCM"], "git");
    }

    #[test]
    fn test_tag_event_strips_ref_prefix() {
        let mut m = Metadata::default();
        m.curr.event = Event::Tag;
        m.curr.commit.reference = "refs/tags/v1.2.0".into();
        assert_eq!(m.environ()["CI_COMMIT_TAG"], "v1.2.0");

        m.curr.event = Event::Push;
        assert_eq!(m.environ()["CI_COMMIT_TAG"], "");
    }

    #[test]
    fn test_pull_request_fields() {
        let mut m = Metadata::default();
        m.curr.event = Event::PullRequest;
        m.curr.commit = Commit {
            reference: "refs/pull/42/head".into(),
            refspec: "feature/x:main".into(),
            branch: "main".into(),
            pull_request_labels: vec!["bug".into(), "ci".into()],
            ..Default::default()
        };

        let env = m.environ();
        assert_eq!(env["CI_COMMIT_PULL_REQUEST"], "42");
        assert_eq!(env["CI_COMMIT_SOURCE_BRANCH"], "feature/x");
        assert_eq!(env["CI_COMMIT_TARGET_BRANCH"], "main");
        assert_eq!(env["CI_COMMIT_PULL_REQUEST_LABELS"], "bug,ci");
    }

    #[test]
    fn test_pipeline_url() {
        let mut m = Metadata::default();
        m.sys.url = "https://ci.example.com/".into();
        m.repo = Repo {
            id: 7,
            ..Default::default()
        };
        m.curr.number = 12;
        assert_eq!(
            m.environ()["CI_PIPELINE_URL"],
            "https://ci.example.com/repos/7/pipeline/12"
        );
    }

    #[test]
    fn test_changed_files_are_json() {
        let mut m = Metadata::default();
        m.curr.commit.changed_files = vec!["a.rs".into(), "docs/b.md".into()];
        assert_eq!(m.environ()["CI_PIPELINE_FILES"], r#"["a.rs","docs/b.md"]"#);
    }
}
