//! Configuration loading and representation.
//!
//! Values come from environment variables; every variable is optional and falls
//! back to the default documented on the field.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: expected a boolean")]
    InvalidBool { var: &'static str, value: String },
}

/// Behaviour of the stock level maintainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevelConfig {
    /// Recompute a part when one of its stock entries is deleted. Default `true`.
    pub recompute_on_delete: bool,
    /// Recompute the previous part too when an entry is moved to another part.
    /// Default `true`.
    pub recompute_previous_owner: bool,
}

impl Default for StockLevelConfig {
    fn default() -> Self {
        Self {
            recompute_on_delete: true,
            recompute_previous_owner: true,
        }
    }
}

impl StockLevelConfig {
    pub const RECOMPUTE_ON_DELETE_VAR: &'static str = "LIMAS_STOCK_RECOMPUTE_ON_DELETE";
    pub const RECOMPUTE_PREVIOUS_OWNER_VAR: &'static str = "LIMAS_STOCK_RECOMPUTE_PREVIOUS_OWNER";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map instead of the
    /// process environment).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            recompute_on_delete: read_bool(
                &lookup,
                Self::RECOMPUTE_ON_DELETE_VAR,
                defaults.recompute_on_delete,
            )?,
            recompute_previous_owner: read_bool(
                &lookup,
                Self::RECOMPUTE_PREVIOUS_OWNER_VAR,
                defaults.recompute_previous_owner,
            )?,
        })
    }
}

fn read_bool<F>(lookup: &F, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn missing_variables_use_defaults() {
        let config = StockLevelConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StockLevelConfig::default());
    }

    #[test]
    fn boolean_spellings_are_accepted() {
        let config = StockLevelConfig::from_lookup(lookup(&[
            (StockLevelConfig::RECOMPUTE_ON_DELETE_VAR, " OFF "),
            (StockLevelConfig::RECOMPUTE_PREVIOUS_OWNER_VAR, "yes"),
        ]))
        .unwrap();
        assert!(!config.recompute_on_delete);
        assert!(config.recompute_previous_owner);
    }

    #[test]
    fn garbage_is_rejected_with_variable_name() {
        let err = StockLevelConfig::from_lookup(lookup(&[(
            StockLevelConfig::RECOMPUTE_ON_DELETE_VAR,
            "sometimes",
        )]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidBool {
                var: StockLevelConfig::RECOMPUTE_ON_DELETE_VAR,
                value: "sometimes".to_string(),
            }
        );
    }
}
