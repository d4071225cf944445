// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Free-form step parameters (`settings` and `environment`)

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// One parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Scalar(String),
    Sequence(Vec<SettingValue>),
    Mapping(Vec<(String, SettingValue)>),
    /// `{from_secret: name}`
    Secret(String),
}

impl SettingValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Secret names referenced anywhere inside this value
    pub fn secret_names(&self) -> Vec<&str> {
        match self {
            Self::Scalar(_) => Vec::new(),
            Self::Secret(name) => vec![name.as_str()],
            Self::Sequence(items) => items.iter().flat_map(|v| v.secret_names()).collect(),
            Self::Mapping(entries) => entries.iter().flat_map(|(_, v)| v.secret_names()).collect(),
        }
    }
}

impl Serialize for SettingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            Self::Scalar(s) => serializer.serialize_str(s),
            Self::Sequence(items) => items.serialize(serializer),
            Self::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Secret(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("from_secret", name)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for SettingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SettingVisitor)
    }
}

struct SettingVisitor;

impl<'de> Visitor<'de> for SettingVisitor {
    type Value = SettingValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a scalar, a sequence, a mapping, or {from_secret: name}")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<SettingValue, E> {
        Ok(SettingValue::Scalar(v.to_string()))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<SettingValue, E> {
        Ok(SettingValue::Scalar(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<SettingValue, E> {
        Ok(SettingValue::Scalar(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<SettingValue, E> {
        Ok(SettingValue::Scalar(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<SettingValue, E> {
        Ok(SettingValue::Scalar(v.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<SettingValue, E> {
        Ok(SettingValue::Scalar(String::new()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<SettingValue, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<SettingValue>()? {
            items.push(item);
        }
        Ok(SettingValue::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<SettingValue, A::Error> {
        let mut entries = Vec::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value::<SettingValue>()?;
            entries.push((key, value));
        }

        if let [(key, SettingValue::Scalar(name))] = entries.as_slice() {
            if key == "from_secret" {
                return Ok(SettingValue::Secret(name.clone()));
            }
        }
        Ok(SettingValue::Mapping(entries))
    }
}

/// Ordered parameter block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(pub Vec<(String, SettingValue)>);

impl Params {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ParamsVisitor)
    }
}

struct ParamsVisitor;

impl<'de> Visitor<'de> for ParamsVisitor {
    type Value = Params;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a mapping of parameters or a list of KEY=VALUE strings")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Params, E> {
        Ok(Params::default())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Params, A::Error> {
        let mut entries: Vec<(String, SettingValue)> = Vec::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value::<SettingValue>()?;
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(de::Error::custom(format!("duplicate key '{}'", key)));
            }
            entries.push((key, value));
        }
        Ok(Params(entries))
    }

    /// `- KEY=VALUE` list form
    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Params, A::Error> {
        let mut entries = Vec::new();
        while let Some(item) = seq.next_element::<String>()? {
            let (key, value) = item.split_once('=').unwrap_or((item.as_str(), ""));
            entries.push((key.to_string(), SettingValue::Scalar(value.to_string())));
        }
        Ok(Params(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_preserve_order() {
        let p: Params = serde_yaml::from_str("zeta: 1\nalpha: two\nmid: true").unwrap();
        let keys: Vec<&str> = p.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(p.get("zeta"), Some(&SettingValue::Scalar("1".into())));
    }

    #[test]
    fn test_secret_reference() {
        let p: Params = serde_yaml::from_str("password:\n  from_secret: docker_password").unwrap();
        assert_eq!(
            p.get("password"),
            Some(&SettingValue::Secret("docker_password".into()))
        );
        assert_eq!(p.get("password").unwrap().secret_names(), vec!["docker_password"]);
    }

    #[test]
    fn test_nested_values() {
        let p: Params =
            serde_yaml::from_str("tags: [latest, '1.0']\nbuild_args:\n  A: b\n  TOKEN:\n    from_secret: t")
                .unwrap();
        assert!(matches!(p.get("tags"), Some(SettingValue::Sequence(items)) if items.len() == 2));
        let args = p.get("build_args").unwrap();
        assert!(matches!(args, SettingValue::Mapping(entries) if entries.len() == 2));
        assert_eq!(args.secret_names(), vec!["t"]);
    }

    #[test]
    fn test_list_form() {
        let p: Params = serde_yaml::from_str("- GOOS=linux\n- EMPTY").unwrap();
        assert_eq!(p.get("GOOS").and_then(|v| v.as_scalar()), Some("linux"));
        assert_eq!(p.get("EMPTY").and_then(|v| v.as_scalar()), Some(""));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        assert!(serde_yaml::from_str::<Params>("a: 1\na: 2").is_err());
    }
}
