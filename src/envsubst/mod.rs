// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagecraft contributors

//! `${NAME}` substitution over raw workflow text
//!
//! Supported forms:
//!
//! | form | result |
//! |---|---|
//! | `${V}` | value of `V`, empty when unset |
//! | `${V:-d}`, `${V:=d}` | `d` when `V` is unset or empty |
//! | `${V-d}`, `${V=d}` | `d` when `V` is unset |
//! | `${V^^}`, `${V,,}` | upper / lower case |
//! | `${V^}`, `${V,}` | first character upper / lower case |
//! | `${#V}` | length in characters |
//! | `${V:off}`, `${V:off:len}` | substring; negative `off` counts from the end |
//! | `${V#p}`, `${V%s}` | strip literal prefix / suffix |
//! | `${V/old/new}`, `${V//old/new}` | replace first / every occurrence |
//!
//! `$$` produces a literal `$`; any other `$` is copied unchanged. Values
//! containing a newline are emitted as double-quoted scalars so the result
//! still parses as YAML.

use std::collections::BTreeMap;

use crate::errors::{StagecraftError, StagecraftResult};

/// Substitute using a map of variables
pub fn substitute(input: &str, vars: &BTreeMap<String, String>) -> StagecraftResult<String> {
    substitute_with(input, |name| vars.get(name).cloned())
}

/// Substitute using an arbitrary lookup
pub fn substitute_with<F>(input: &str, lookup: F) -> StagecraftResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    substitute_dyn(input, &lookup)
}

fn substitute_dyn(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> StagecraftResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut offset = 0;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];

        if tail.starts_with("$$") {
            out.push('$');
            rest = &tail[2..];
            offset += idx + 2;
        } else if tail.starts_with("${") {
            let close = matching_brace(&tail[2..]).ok_or_else(|| StagecraftError::Substitution {
                message: format!("unterminated '${{' at offset {}", offset + idx),
            })?;
            let expression = &tail[2..2 + close];
            let value = expand(expression, lookup)?;
            if value.contains('\n') {
                out.push_str(&quote(&value));
            } else {
                out.push_str(&value);
            }
            rest = &tail[2 + close + 1..];
            offset += idx + 2 + close + 1;
        } else {
            out.push('$');
            rest = &tail[1..];
            offset += idx + 1;
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Index of the `}` closing an expression, honoring nested `${...}`
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 1;
            }
            b'}' if depth == 0 => return Some(i),
            b'}' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn expand(expression: &str, lookup: &dyn Fn(&str) -> Option<String>) -> StagecraftResult<String> {
    let bad = |reason: &str| StagecraftError::Substitution {
        message: format!("bad substitution '${{{}}}': {}", expression, reason),
    };

    if let Some(name) = expression.strip_prefix('#') {
        if name.is_empty() || !name.chars().all(is_name_char) {
            return Err(bad("expected a variable name after '#'"));
        }
        let value = lookup(name).unwrap_or_default();
        return Ok(value.chars().count().to_string());
    }

    let name_len = expression
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(expression.len());
    let (name, op) = expression.split_at(name_len);
    if name.is_empty() {
        return Err(bad("empty variable name"));
    }

    let raw = lookup(name);
    let value = raw.clone().unwrap_or_default();
    let arg = |skip: usize| substitute_dyn(&op[skip..], lookup);

    let result = if op.is_empty() {
        value
    } else if op.starts_with(":-") || op.starts_with(":=") {
        if value.is_empty() {
            arg(2)?
        } else {
            value
        }
    } else if op.starts_with('-') || op.starts_with('=') {
        match raw {
            Some(v) => v,
            None => arg(1)?,
        }
    } else if op == "^^" {
        value.to_uppercase()
    } else if op == ",," {
        value.to_lowercase()
    } else if op == "^" {
        map_first(&value, |c| c.to_uppercase().collect())
    } else if op == "," {
        map_first(&value, |c| c.to_lowercase().collect())
    } else if let Some(spec) = op.strip_prefix(':') {
        substring(&value, spec).ok_or_else(|| bad("expected ':offset' or ':offset:length'"))?
    } else if op.starts_with('#') {
        let prefix = arg(1)?;
        value.strip_prefix(prefix.as_str()).unwrap_or(&value).to_string()
    } else if op.starts_with('%') {
        let suffix = arg(1)?;
        value.strip_suffix(suffix.as_str()).unwrap_or(&value).to_string()
    } else if let Some(pattern) = op.strip_prefix("//") {
        let (old, new) = pattern.split_once('/').unwrap_or((pattern, ""));
        if old.is_empty() {
            value
        } else {
            value.replace(old, new)
        }
    } else if let Some(pattern) = op.strip_prefix('/') {
        let (old, new) = pattern.split_once('/').unwrap_or((pattern, ""));
        if old.is_empty() {
            value
        } else {
            value.replacen(old, new, 1)
        }
    } else {
        return Err(bad("unknown operator"));
    };

    Ok(result)
}

fn map_first(value: &str, f: impl Fn(char) -> String) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => {
            let mut out = f(first);
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

fn substring(value: &str, spec: &str) -> Option<String> {
    let (offset, length) = match spec.split_once(':') {
        Some((o, l)) => (o.trim(), Some(l.trim())),
        None => (spec.trim(), None),
    };

    let chars: Vec<char> = value.chars().collect();
    let total = chars.len() as i64;

    let offset: i64 = offset.parse().ok()?;
    let start = if offset < 0 {
        (total + offset).max(0)
    } else {
        offset.min(total)
    } as usize;

    let end = match length {
        None => chars.len(),
        Some(l) => {
            let length: i64 = l.parse().ok()?;
            if length < 0 {
                return None;
            }
            (start + length as usize).min(chars.len())
        }
    };

    Some(chars[start..end].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("BRANCH".to_string(), "Feature/Login".to_string()),
            ("EMPTY".to_string(), String::new()),
            ("SHA".to_string(), "0123456789abcdef".to_string()),
            ("MULTI".to_string(), "line one\nline two".to_string()),
        ])
    }

    fn sub(input: &str) -> String {
        substitute(input, &vars()).unwrap()
    }

    #[test]
    fn test_plain_and_unset() {
        assert_eq!(sub("ref: ${BRANCH}"), "ref: Feature/Login");
        assert_eq!(sub("x${MISSING}y"), "xy");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(sub("${EMPTY:-fallback}"), "fallback");
        assert_eq!(sub("${EMPTY-fallback}"), "");
        assert_eq!(sub("${MISSING-fallback}"), "fallback");
        assert_eq!(sub("${MISSING:=x}"), "x");
        assert_eq!(sub("${MISSING:-${BRANCH}}"), "Feature/Login");
    }

    #[test]
    fn test_case_operators() {
        assert_eq!(sub("${BRANCH^^}"), "FEATURE/LOGIN");
        assert_eq!(sub("${BRANCH,,}"), "feature/login");
        assert_eq!(sub("${BRANCH,}"), "feature/Login");
        assert_eq!(sub("${SHA^}"), "0123456789abcdef");
    }

    #[test]
    fn test_length_and_substring() {
        assert_eq!(sub("${#SHA}"), "16");
        assert_eq!(sub("${SHA:0:8}"), "01234567");
        assert_eq!(sub("${SHA:10}"), "abcdef");
        assert_eq!(sub("${SHA: -3}"), "def");
        assert_eq!(sub("${SHA:40}"), "");
    }

    #[test]
    fn test_prefix_suffix_replace() {
        assert_eq!(sub("${BRANCH#Feature/}"), "Login");
        assert_eq!(sub("${BRANCH%/Login}"), "Feature");
        assert_eq!(sub("${BRANCH/Feature/Fix}"), "Fix/Login");
        assert_eq!(sub("${SHA/0123/x}"), "x456789abcdef");
    }

    #[test]
    fn test_replace_all() {
        let vars = BTreeMap::from([("V".to_string(), "a.b.c".to_string())]);
        assert_eq!(substitute("${V//./-}", &vars).unwrap(), "a-b-c");
        assert_eq!(substitute("${V/./-}", &vars).unwrap(), "a-b.c");
    }

    #[test]
    fn test_dollar_escapes() {
        assert_eq!(sub("echo $$HOME"), "echo $HOME");
        assert_eq!(sub("echo $HOME"), "echo $HOME");
        assert_eq!(sub("cost: 5$"), "cost: 5$");
        assert_eq!(sub("$${BRANCH}"), "${BRANCH}");
    }

    #[test]
    fn test_newline_values_are_quoted() {
        assert_eq!(sub("msg: ${MULTI}"), "msg: \"line one\\nline two\"");
        let parsed: serde_yaml::Value = serde_yaml::from_str(&sub("msg: ${MULTI}")).unwrap();
        assert_eq!(parsed["msg"].as_str(), Some("line one\nline two"));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            substitute("image: ${TAG", &vars()),
            Err(StagecraftError::Substitution { .. })
        ));
        assert!(matches!(
            substitute("${}", &vars()),
            Err(StagecraftError::Substitution { .. })
        ));
        assert!(matches!(
            substitute("${SHA:x}", &vars()),
            Err(StagecraftError::Substitution { .. })
        ));
        assert!(matches!(
            substitute("${SHA@Q}", &vars()),
            Err(StagecraftError::Substitution { .. })
        ));
    }
}
