// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Include/exclude string lists and key/value maps

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::glob_match;
use crate::utils::yaml::{one_or_many, scalar_to_string};

/// A list of glob patterns with optional exclusions
///
/// Accepts `main`, `[main, release/*]` or
/// `{include: [...], exclude: [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct List {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl List {
    pub fn new(include: &[&str], exclude: &[&str]) -> Self {
        Self {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// `v` is not excluded, and is included or nothing is included explicitly
    pub fn matches(&self, v: &str) -> bool {
        if self.excludes(v) {
            return false;
        }
        self.include.is_empty() || self.includes(v)
    }

    pub fn includes(&self, v: &str) -> bool {
        self.include.iter().any(|p| glob_match(p, v))
    }

    pub fn excludes(&self, v: &str) -> bool {
        self.exclude.iter().any(|p| glob_match(p, v))
    }
}

#[derive(Deserialize)]
struct ListDetails {
    #[serde(default, deserialize_with = "one_or_many")]
    include: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    exclude: Vec<String>,
}

impl<'de> Deserialize<'de> for List {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ListVisitor)
    }
}

struct ListVisitor;

impl ListVisitor {
    fn single(v: String) -> List {
        List {
            include: vec![v],
            exclude: Vec::new(),
        }
    }
}

impl<'de> Visitor<'de> for ListVisitor {
    type Value = List;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, a list of strings, or an include/exclude mapping")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<List, E> {
        Ok(Self::single(v.to_string()))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<List, E> {
        Ok(Self::single(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<List, E> {
        Ok(Self::single(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<List, E> {
        Ok(Self::single(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<List, E> {
        Ok(Self::single(v.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<List, E> {
        Ok(List::default())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<List, A::Error> {
        let mut include = Vec::new();
        while let Some(item) = seq.next_element::<String>()? {
            include.push(item);
        }
        Ok(List {
            include,
            exclude: Vec::new(),
        })
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<List, A::Error> {
        let details = ListDetails::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(List {
            include: details.include,
            exclude: details.exclude,
        })
    }
}

/// Key/value glob constraints, used for matrix filters
///
/// A plain mapping is treated as the include set; `{include: {...},
/// exclude: {...}}` sets both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Map {
    pub include: BTreeMap<String, String>,
    pub exclude: BTreeMap<String, String>,
}

impl Map {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Exclusion requires every exclude key to match; inclusion requires
    /// every include key to match.
    pub fn matches(&self, params: &BTreeMap<String, String>) -> bool {
        if self.is_empty() {
            return true;
        }

        if !self.exclude.is_empty() {
            let excluded = self
                .exclude
                .iter()
                .all(|(key, pattern)| glob_match(pattern, lookup(params, key)));
            if excluded {
                return false;
            }
        }

        self.include
            .iter()
            .all(|(key, pattern)| glob_match(pattern, lookup(params, key)))
    }
}

fn lookup<'a>(params: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or("")
}

impl<'de> Deserialize<'de> for Map {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();

        let detailed = !raw.is_empty()
            && raw
                .iter()
                .all(|(k, v)| (k == "include" || k == "exclude") && v.is_mapping());

        if detailed {
            let mut map = Map::default();
            for (key, value) in raw {
                let target = if key == "include" {
                    &mut map.include
                } else {
                    &mut map.exclude
                };
                *target = scalar_mapping(&value).map_err(de::Error::custom)?;
            }
            return Ok(map);
        }

        let mut include = BTreeMap::new();
        for (key, value) in raw {
            let value = scalar_to_string(&value)
                .ok_or_else(|| de::Error::custom(format!("value of '{}' must be a scalar", key)))?;
            include.insert(key, value);
        }
        Ok(Map {
            include,
            exclude: BTreeMap::new(),
        })
    }
}

fn scalar_mapping(value: &Value) -> Result<BTreeMap<String, String>, String> {
    let mut out = BTreeMap::new();
    if let Value::Mapping(mapping) = value {
        for (k, v) in mapping {
            let key = scalar_to_string(k).ok_or("mapping keys must be scalars")?;
            let val = scalar_to_string(v)
                .ok_or_else(|| format!("value of '{}' must be a scalar", key))?;
            out.insert(key, val);
        }
    }
    Ok(out)
}
