//! `KINSHIP_*` environment overrides.
//!
//! Overrides are applied to the merged TOML tree before deserialization, so
//! they win over every file layer and still pass through validation.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};

/// Prefix shared by every recognised variable.
pub const ENV_PREFIX: &str = "KINSHIP_";

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Integer,
    Bool,
    Text,
}

/// `(variable, section, field, kind)`.
const OVERRIDES: &[(&str, &str, &str, EnvKind)] = &[
    ("KINSHIP_AUDIT_BATCH_SIZE", "audit", "batch_size", EnvKind::Integer),
    ("KINSHIP_AUDIT_SAMPLE_SIZE", "audit", "sample_size", EnvKind::Integer),
    ("KINSHIP_REPAIR_BATCH_SIZE", "repair", "batch_size", EnvKind::Integer),
    (
        "KINSHIP_REPAIR_REBUILD_THRESHOLD",
        "repair",
        "rebuild_threshold",
        EnvKind::Integer,
    ),
    ("KINSHIP_REPAIR_FORCE_REBUILD", "repair", "force_rebuild", EnvKind::Bool),
    ("KINSHIP_LOG_LEVEL", "logging", "level", EnvKind::Text),
    ("KINSHIP_LOG_FORMAT", "logging", "format", EnvKind::Text),
];

/// Snapshot the process environment, keeping only `KINSHIP_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .collect()
}

/// Apply recognised overrides to `merged`, returning how many were applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] when a numeric or boolean variable does
/// not parse.
pub fn apply_env_overrides(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<usize> {
    let mut applied: usize = 0;
    let Some(root) = merged.as_table_mut() else {
        return Ok(0);
    };
    for (var, section, field, kind) in OVERRIDES {
        let Some(raw) = env_vars.get(*var) else {
            continue;
        };
        let value = parse(var, raw, *kind)?;
        let table = root
            .entry((*section).to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        if let Some(table) = table.as_table_mut() {
            table.insert((*field).to_owned(), value);
            applied = applied.saturating_add(1);
        }
    }
    Ok(applied)
}

fn parse(var: &str, raw: &str, kind: EnvKind) -> ConfigResult<toml::Value> {
    let invalid = || ConfigError::EnvError {
        var: var.to_owned(),
        value: raw.to_owned(),
    };
    let trimmed = raw.trim();
    match kind {
        EnvKind::Integer => trimmed
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|_| invalid()),
        EnvKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(invalid()),
        },
        EnvKind::Text => Ok(toml::Value::String(trimmed.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_overrides_replace_values() {
        let mut merged: toml::Value = toml::from_str("[audit]\nbatch_size = 100\n").unwrap();
        let count = apply_env_overrides(
            &mut merged,
            &vars(&[
                ("KINSHIP_AUDIT_BATCH_SIZE", "25"),
                ("KINSHIP_LOG_LEVEL", "debug"),
            ]),
        )
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(merged["audit"]["batch_size"].as_integer(), Some(25));
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
    }

    #[test]
    fn test_bad_integer_is_rejected() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let result = apply_env_overrides(
            &mut merged,
            &vars(&[("KINSHIP_REPAIR_BATCH_SIZE", "lots")]),
        );
        assert!(matches!(result, Err(ConfigError::EnvError { .. })));
    }

    #[test]
    fn test_bool_spellings() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        apply_env_overrides(
            &mut merged,
            &vars(&[("KINSHIP_REPAIR_FORCE_REBUILD", "yes")]),
        )
        .unwrap();
        assert_eq!(merged["repair"]["force_rebuild"].as_bool(), Some(true));
    }

    #[test]
    fn test_unrelated_vars_ignored() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let count =
            apply_env_overrides(&mut merged, &vars(&[("KINSHIP_UNKNOWN", "1")])).unwrap();
        assert_eq!(count, 0);
    }
}
