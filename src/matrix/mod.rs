// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Matrix expansion
//!
//! A workflow file may declare a `matrix` block:
//!
//! ```yaml
//! matrix:
//!   GO_VERSION: [1.21, 1.22]
//!   DATABASE: [postgres, mysql, sqlite]
//! ```
//!
//! Expansion yields the cross product of all axes, iterating axes in
//! declaration order so the first-declared axis varies slowest. Alternatively
//! an `include` list spells out each assignment explicitly. Files without a
//! matrix expand to a single empty assignment.

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{StagecraftError, StagecraftResult};

/// Maximum number of axes considered for the cross product
pub const MAX_AXES: usize = 10;

/// Maximum number of assignments produced for one file
pub const MAX_ASSIGNMENTS: usize = 25;

/// One matrix assignment: variable name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Axis(BTreeMap<String, String>);

impl Axis {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self(vars)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Display for Axis {
    /// `K=V K2=V2`, keys sorted
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Parsed `matrix` block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matrix {
    /// Axes in declaration order
    pub axes: Vec<(String, Vec<String>)>,
    /// Explicit assignments, used instead of the cross product when present
    pub include: Vec<BTreeMap<String, String>>,
}

impl Matrix {
    /// Parse the matrix block out of a complete workflow file
    ///
    /// The rest of the document is ignored; it has not been substituted yet
    /// and is not validated here.
    pub fn from_yaml(text: &str) -> StagecraftResult<Option<Self>> {
        if is_blank_document(text) {
            return Ok(None);
        }
        let doc: Option<Document> = serde_yaml::from_str(text).map_err(|e| StagecraftError::Matrix {
            message: e.to_string(),
        })?;
        Ok(doc.and_then(|d| d.matrix))
    }

    /// Produce every assignment of this matrix
    pub fn expand(&self) -> Vec<Axis> {
        if !self.include.is_empty() {
            let mut assignments: Vec<Axis> = self.include.iter().cloned().map(Axis).collect();
            truncate_assignments(&mut assignments);
            return assignments;
        }

        let mut axes = self.axes.as_slice();
        if axes.len() > MAX_AXES {
            tracing::warn!(
                "Matrix declares {} axes; only the first {} are used",
                axes.len(),
                MAX_AXES
            );
            axes = &axes[..MAX_AXES];
        }

        // Odometer over the value indices; the last axis varies fastest
        let total = axes
            .iter()
            .fold(1usize, |acc, (_, values)| acc.saturating_mul(values.len()));
        if total > MAX_ASSIGNMENTS {
            warn_truncated(total);
        }

        let mut assignments = Vec::with_capacity(total.min(MAX_ASSIGNMENTS));
        let mut digits = vec![0usize; axes.len()];
        while assignments.len() < total.min(MAX_ASSIGNMENTS) {
            let combo = axes
                .iter()
                .zip(&digits)
                .map(|((name, values), &i)| (name.clone(), values[i].clone()))
                .collect();
            assignments.push(Axis(combo));

            for (digit, (_, values)) in digits.iter_mut().zip(axes).rev() {
                *digit += 1;
                if *digit < values.len() {
                    break;
                }
                *digit = 0;
            }
        }
        assignments
    }
}

fn warn_truncated(total: usize) {
    tracing::warn!(
        "Matrix expands to {} assignments; only the first {} are used",
        total,
        MAX_ASSIGNMENTS
    );
}

fn truncate_assignments(assignments: &mut Vec<Axis>) {
    if assignments.len() > MAX_ASSIGNMENTS {
        warn_truncated(assignments.len());
        assignments.truncate(MAX_ASSIGNMENTS);
    }
}

/// Expand the matrix declared in `text`
///
/// Always returns at least one assignment; an axis without values is a
/// matrix error.
pub fn expand(text: &str) -> StagecraftResult<Vec<Axis>> {
    match Matrix::from_yaml(text)? {
        Some(matrix) => Ok(matrix.expand()),
        None => Ok(vec![Axis::default()]),
    }
}

fn is_blank_document(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---"
    })
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    matrix: Option<Matrix>,
}

impl<'de> Deserialize<'de> for Matrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(MatrixVisitor)
    }
}

struct MatrixVisitor;

impl<'de> Visitor<'de> for MatrixVisitor {
    type Value = Matrix;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a mapping of axis names to value lists")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Matrix, E> {
        Ok(Matrix::default())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Matrix, A::Error> {
        let mut matrix = Matrix::default();
        while let Some(key) = map.next_key::<String>()? {
            if key == "include" {
                matrix.include = map.next_value::<Vec<BTreeMap<String, String>>>()?;
                continue;
            }
            if matrix.axes.iter().any(|(name, _)| *name == key) {
                map.next_value::<IgnoredAny>()?;
                return Err(de::Error::custom(format!("duplicate matrix axis '{}'", key)));
            }
            let values = map
                .next_value::<Vec<String>>()
                .map_err(|e| de::Error::custom(format!("axis '{}': {}", key, e)))?;
            if values.is_empty() {
                return Err(de::Error::custom(format!("axis '{}' has no values", key)));
            }
            matrix.axes.push((key, values));
        }
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_matrix_yields_single_empty_assignment() {
        let axes = expand("steps:\n  build:\n    image: alpine\n").unwrap();
        assert_eq!(axes, vec![Axis::default()]);
        assert_eq!(expand("").unwrap(), vec![Axis::default()]);
    }

    #[test]
    fn test_cross_product_in_declaration_order() {
        let text = "matrix:\n  GO: [1.21, 1.22]\n  DB: [postgres, mysql, sqlite]\nsteps: {}\n";
        let axes = expand(text).unwrap();
        assert_eq!(axes.len(), 6);

        let rendered: Vec<String> = axes.iter().map(|a| a.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "DB=postgres GO=1.21",
                "DB=mysql GO=1.21",
                "DB=sqlite GO=1.21",
                "DB=postgres GO=1.22",
                "DB=mysql GO=1.22",
                "DB=sqlite GO=1.22",
            ]
        );
    }

    #[test]
    fn test_scalar_text_is_preserved() {
        let axes = expand("matrix:\n  GO: [1.20, 1.21]\n").unwrap();
        assert_eq!(axes[0].get("GO"), Some("1.20"));
    }

    #[test]
    fn test_include_form() {
        let text = "matrix:\n  include:\n    - GO: 1.21\n      DB: postgres\n    - GO: 1.22\n      DB: mysql\n";
        let axes = expand(text).unwrap();
        assert_eq!(axes.len(), 2);
        assert_eq!(axes[1].get("DB"), Some("mysql"));
    }

    #[test]
    fn test_assignment_limit() {
        let text = "matrix:\n  A: [1, 2, 3, 4, 5, 6]\n  B: [1, 2, 3, 4, 5, 6]\n";
        assert_eq!(expand(text).unwrap().len(), MAX_ASSIGNMENTS);
    }

    #[test]
    fn test_malformed_matrix() {
        let err = expand("matrix:\n  GO:\n    nested: map\n").unwrap_err();
        assert!(matches!(err, StagecraftError::Matrix { .. }));

        let err = expand("matrix: [a, b]\n").unwrap_err();
        assert!(matches!(err, StagecraftError::Matrix { .. }));
    }

    #[test]
    fn test_large_matrix_stops_at_limit() {
        let mut text = String::from("matrix:\n");
        for axis in 0..MAX_AXES {
            text.push_str(&format!("  A{}: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]\n", axis));
        }
        let axes = expand(&text).unwrap();
        assert_eq!(axes.len(), MAX_ASSIGNMENTS);
        assert_eq!(axes[0].get("A0"), Some("0"));
        assert_eq!(axes[0].get("A9"), Some("0"));
        assert_eq!(axes[24].get("A8"), Some("2"));
        assert_eq!(axes[24].get("A9"), Some("4"));
    }

    #[test]
    fn test_empty_axis_is_rejected() {
        let err = expand("matrix:\n  GO: []\nsteps:\n  build:\n    image: golang\n").unwrap_err();
        match err {
            StagecraftError::Matrix { message } => assert!(message.contains("GO")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsubstituted_text_still_expands() {
        let text = "matrix:\n  TAG: [a, b]\nsteps:\n  build:\n    image: alpine:${TAG}\n";
        assert_eq!(expand(text).unwrap().len(), 2);
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let text = "matrix:\n  Z: [1, 2]\n  A: [x, y]\n";
        assert_eq!(expand(text).unwrap(), expand(text).unwrap());
    }
}
