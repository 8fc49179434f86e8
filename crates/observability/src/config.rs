use core::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObservabilityError {
    #[error("invalid log format {0:?}: expected `json` or `pretty`")]
    InvalidLogFormat(String),
}

/// Output format of the log subscriber.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable multi-line output for local development.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(ObservabilityError::InvalidLogFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_filter: "info".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub const LOG_FORMAT_VAR: &'static str = "LIMAS_LOG_FORMAT";

    pub fn from_env() -> Result<Self, ObservabilityError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ObservabilityError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = match lookup(Self::LOG_FORMAT_VAR) {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => LogFormat::default(),
        };
        Ok(Self {
            format,
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_json() {
        let config = ObservabilityConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.default_filter, "info");
    }

    #[test]
    fn pretty_format_is_case_insensitive() {
        let config = ObservabilityConfig::from_lookup(|_| Some("Pretty".to_string())).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = ObservabilityConfig::from_lookup(|_| Some("xml".to_string())).unwrap_err();
        assert_eq!(err, ObservabilityError::InvalidLogFormat("xml".to_string()));
    }
}
