// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Container image references

use crate::constraint::glob_match;

const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const DEFAULT_TAG: &str = "latest";

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub domain: String,
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn parse(image: &str) -> Option<Self> {
        let image = image.trim();
        if image.is_empty() || image.chars().any(char::is_whitespace) {
            return None;
        }

        let (rest, digest) = match image.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (image, None),
        };

        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => (
                &rest[..last_slash + i],
                Some(rest[last_slash + i + 1..].to_string()),
            ),
            None => (rest, None),
        };
        if name.is_empty() || tag.as_deref() == Some("") {
            return None;
        }

        let (domain, path) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), remainder.to_string())
            }
            _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
        };
        let domain = if domain == LEGACY_DEFAULT_DOMAIN {
            DEFAULT_DOMAIN.to_string()
        } else {
            domain
        };
        let path = if domain == DEFAULT_DOMAIN && !path.contains('/') {
            format!("{}{}", OFFICIAL_REPO_PREFIX, path)
        } else {
            path
        };

        Some(Self {
            domain,
            path,
            tag,
            digest,
        })
    }

    /// Short name without domain (for the default registry), tag or digest
    pub fn familiar_name(&self) -> String {
        if self.domain == DEFAULT_DOMAIN {
            self.path
                .strip_prefix(OFFICIAL_REPO_PREFIX)
                .unwrap_or(&self.path)
                .to_string()
        } else {
            format!("{}/{}", self.domain, self.path)
        }
    }

    /// Fully qualified reference, defaulting the tag to `latest`
    pub fn expanded(&self) -> String {
        let mut out = format!("{}/{}", self.domain, self.path);
        match (&self.tag, &self.digest) {
            (Some(tag), _) => {
                out.push(':');
                out.push_str(tag);
            }
            (None, None) => {
                out.push(':');
                out.push_str(DEFAULT_TAG);
            }
            (None, Some(_)) => {}
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }
}

/// `alpine` becomes `docker.io/library/alpine:latest`
pub fn expand_image(image: &str) -> String {
    ImageRef::parse(image)
        .map(|r| r.expanded())
        .unwrap_or_else(|| image.to_string())
}

/// `docker.io/library/alpine:3` becomes `alpine`
pub fn trim_image(image: &str) -> String {
    ImageRef::parse(image)
        .map(|r| r.familiar_name())
        .unwrap_or_else(|| image.to_string())
}

/// Whether `image` names the same repository as any entry of `candidates`
///
/// Tags are ignored; candidates may use glob patterns.
pub fn match_image(image: &str, candidates: &[String]) -> bool {
    let trimmed = trim_image(image);
    candidates.iter().any(|candidate| {
        let candidate_trimmed = trim_image(candidate);
        trimmed == candidate_trimmed || glob_match(candidate, &trimmed)
    })
}

/// Whether `image` is pulled from `hostname`
pub fn match_hostname(image: &str, hostname: &str) -> bool {
    let hostname = if hostname == LEGACY_DEFAULT_DOMAIN {
        DEFAULT_DOMAIN
    } else {
        hostname
    };
    ImageRef::parse(image).is_some_and(|r| r.domain == hostname)
}
