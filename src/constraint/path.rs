// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Changed-file path filters

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;

use super::glob_match;
use crate::utils::yaml::one_or_many;

/// Path include/exclude patterns applied to a commit's changed files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Case-insensitive commit message marker that bypasses the filter
    pub ignore_message: String,
    /// Result for commits without changed files
    pub on_empty: bool,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            ignore_message: String::new(),
            on_empty: true,
        }
    }
}

impl PathFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn matches(&self, files: &[String], message: &str) -> bool {
        if !self.ignore_message.is_empty()
            && message
                .to_lowercase()
                .contains(&self.ignore_message.to_lowercase())
        {
            return true;
        }

        if files.is_empty() {
            return self.on_empty;
        }

        if self.excludes(files) {
            return false;
        }

        self.include.is_empty() || self.includes(files)
    }

    /// Any changed file matches any include pattern
    pub fn includes(&self, files: &[String]) -> bool {
        self.include
            .iter()
            .any(|pattern| files.iter().any(|file| glob_match(pattern, file)))
    }

    /// Any changed file matches any exclude pattern
    pub fn excludes(&self, files: &[String]) -> bool {
        self.exclude
            .iter()
            .any(|pattern| files.iter().any(|file| glob_match(pattern, file)))
    }
}

#[derive(Deserialize)]
struct PathDetails {
    #[serde(default, deserialize_with = "one_or_many")]
    include: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    exclude: Vec<String>,
    #[serde(default)]
    ignore_message: String,
    #[serde(default = "default_on_empty")]
    on_empty: bool,
}

fn default_on_empty() -> bool {
    true
}

impl<'de> Deserialize<'de> for PathFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PathVisitor)
    }
}

struct PathVisitor;

impl<'de> Visitor<'de> for PathVisitor {
    type Value = PathFilter;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a path pattern, a list of patterns, or a path filter mapping")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PathFilter, E> {
        Ok(PathFilter {
            include: vec![v.to_string()],
            ..Default::default()
        })
    }

    fn visit_unit<E: de::Error>(self) -> Result<PathFilter, E> {
        Ok(PathFilter::default())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<PathFilter, A::Error> {
        let mut include = Vec::new();
        while let Some(item) = seq.next_element::<String>()? {
            include.push(item);
        }
        Ok(PathFilter {
            include,
            ..Default::default()
        })
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<PathFilter, A::Error> {
        let d = PathDetails::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(PathFilter {
            include: d.include,
            exclude: d.exclude,
            ignore_message: d.ignore_message,
            on_empty: d.on_empty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_include_crosses_directories_with_double_star() {
        let filter = PathFilter {
            include: vec!["src/**/*.rs".into()],
            ..Default::default()
        };
        assert!(filter.matches(&files(&["src/compiler/mod.rs"]), ""));
        assert!(!filter.matches(&files(&["docs/index.md"]), ""));
    }

    #[test]
    fn test_single_star_stays_in_directory() {
        let filter = PathFilter {
            include: vec!["*.md".into()],
            ..Default::default()
        };
        assert!(filter.matches(&files(&["README.md"]), ""));
        assert!(!filter.matches(&files(&["docs/guide.md"]), ""));
    }

    #[test]
    fn test_any_excluded_file_fails() {
        let filter = PathFilter {
            exclude: vec!["**/*.md".into()],
            ..Default::default()
        };
        assert!(filter.matches(&files(&["src/lib.rs"]), ""));
        assert!(!filter.matches(&files(&["src/lib.rs", "docs/guide.md"]), ""));
    }

    #[test]
    fn test_ignore_message_is_case_insensitive() {
        let filter = PathFilter {
            include: vec!["src/**/*.rs".into()],
            ignore_message: "[ALL]".into(),
            ..Default::default()
        };
        assert!(filter.matches(&files(&["docs/index.md"]), "docs: tweak [all]"));
    }

    #[test]
    fn test_on_empty_policy() {
        let mut filter = PathFilter {
            include: vec!["src/**/*.rs".into()],
            ..Default::default()
        };
        assert!(filter.matches(&[], ""));
        filter.on_empty = false;
        assert!(!filter.matches(&[], ""));
    }

    #[test]
    fn test_deserialize_shapes() {
        let single: PathFilter = serde_yaml::from_str("'src/**/*.rs'").unwrap();
        assert_eq!(single.include, vec!["src/**/*.rs"]);
        assert!(single.on_empty);

        let detailed: PathFilter = serde_yaml::from_str(
            "include: ['src/**/*.rs']\nexclude: '**/*.md'\nignore_message: '[ALL]'\non_empty: false",
        )
        .unwrap();
        assert_eq!(detailed.exclude, vec!["**/*.md"]);
        assert_eq!(detailed.ignore_message, "[ALL]");
        assert!(!detailed.on_empty);
    }
}
