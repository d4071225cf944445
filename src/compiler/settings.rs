// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! Parameter blocks to environment variables

use std::collections::BTreeMap;

use crate::errors::StagecraftResult;
use crate::pipeline::{Params, SettingValue};

/// Write `params` into `env`
///
/// With `upper`, keys are upper-cased and `.`/`-` become `_` (plugin
/// settings); otherwise keys are kept verbatim (step environment). Secret
/// references are resolved through `secret`.
pub fn params_to_env(
    params: &Params,
    env: &mut BTreeMap<String, String>,
    prefix: &str,
    upper: bool,
    secret: &dyn Fn(&str) -> StagecraftResult<String>,
) -> StagecraftResult<()> {
    for (key, value) in params.iter() {
        if key.is_empty() {
            continue;
        }
        env.insert(env_key(prefix, upper, key), env_value(value, secret)?);
    }
    Ok(())
}

fn env_key(prefix: &str, upper: bool, key: &str) -> String {
    if upper {
        format!("{}{}", prefix, key.replace(['.', '-'], "_").to_uppercase())
    } else {
        format!("{}{}", prefix, key)
    }
}

/// Scalars verbatim, scalar lists comma-joined, anything else as JSON
fn env_value(
    value: &SettingValue,
    secret: &dyn Fn(&str) -> StagecraftResult<String>,
) -> StagecraftResult<String> {
    match value {
        SettingValue::Scalar(s) => Ok(s.clone()),
        SettingValue::Secret(name) => secret(name),
        SettingValue::Sequence(items) => {
            if items
                .iter()
                .all(|i| matches!(i, SettingValue::Scalar(_) | SettingValue::Secret(_)))
            {
                let parts = items
                    .iter()
                    .map(|i| env_value(i, secret))
                    .collect::<StagecraftResult<Vec<_>>>()?;
                Ok(parts.join(","))
            } else {
                Ok(serde_json::to_string(&to_json(value, secret)?)?)
            }
        }
        SettingValue::Mapping(_) => Ok(serde_json::to_string(&to_json(value, secret)?)?),
    }
}

fn to_json(
    value: &SettingValue,
    secret: &dyn Fn(&str) -> StagecraftResult<String>,
) -> StagecraftResult<serde_json::Value> {
    Ok(match value {
        SettingValue::Scalar(s) => serde_json::Value::String(s.clone()),
        SettingValue::Secret(name) => serde_json::Value::String(secret(name)?),
        SettingValue::Sequence(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|i| to_json(i, secret))
                .collect::<StagecraftResult<_>>()?,
        ),
        SettingValue::Mapping(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), to_json(v, secret)?);
            }
            serde_json::Value::Object(map)
        }
    })
}
