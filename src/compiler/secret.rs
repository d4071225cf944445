// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Secrets and registry credentials

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::image::{match_hostname, match_image};
use crate::errors::{StagecraftError, StagecraftResult};
use crate::metadata::Event;
use crate::pipeline::Container;

/// A named secret value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub name: String,
    pub value: String,
    /// When set, only plugins using one of these images receive the secret
    pub images: Vec<String>,
    /// When set, the secret is only available for these events
    pub events: Vec<Event>,
}

impl Secret {
    /// Whether the secret may be handed to `container` for `event`
    pub fn available(&self, event: Event, container: &Container) -> StagecraftResult<()> {
        let deny = |reason: String| StagecraftError::SecretNotAllowed {
            name: self.name.clone(),
            reason,
        };

        if !self.images.is_empty() {
            if !container.is_plugin() {
                return Err(deny(
                    "it is restricted to plugin images and cannot be used by command steps".into(),
                ));
            }
            if !match_image(&container.image, &self.images) {
                return Err(deny(format!(
                    "image '{}' of step '{}' is not in its image filter",
                    container.image, container.name
                )));
            }
        }

        if !self.matches_event(event) {
            return Err(deny(format!("it is not available for '{}' events", event)));
        }
        Ok(())
    }

    /// An empty event filter matches everything; closed pull requests count
    /// as pull requests.
    pub fn matches_event(&self, event: Event) -> bool {
        if self.events.is_empty() {
            return true;
        }
        let event = if event == Event::PullRequestClosed {
            Event::PullRequest
        } else {
            event
        };
        self.events.contains(&event)
    }
}

/// Case-insensitive secret lookup
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    secrets: HashMap<String, Secret>,
}

impl SecretStore {
    pub fn new(secrets: &[Secret]) -> Self {
        Self {
            secrets: secrets
                .iter()
                .map(|s| (s.name.to_lowercase(), s.clone()))
                .collect(),
        }
    }

    /// Resolve a secret's value for a container
    pub fn value(&self, name: &str, event: Event, container: &Container) -> StagecraftResult<String> {
        let secret = self
            .secrets
            .get(&name.to_lowercase())
            .ok_or_else(|| StagecraftError::SecretNotFound { name: name.to_string() })?;
        secret.available(event, container)?;
        Ok(secret.value.clone())
    }
}

/// Credentials for one registry host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

/// First registry whose hostname serves `image`
pub fn registry_for<'a>(registries: &'a [Registry], image: &str) -> Option<&'a Registry> {
    registries.iter().find(|r| match_hostname(image, &r.hostname))
}
