//! Logger parameters.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Level of logging verbosity
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Trace
    Trace,
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warn
    Warn,
    /// Error, the default of the sample scripts
    #[default]
    Error,
}

/// Unknown log level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level `{0}`, expected one of TRACE, DEBUG, INFO, WARN, ERROR")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" | "CRITICAL" => Ok(Self::Error),
            _ => Err(ParseLevelError(s.to_owned())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

impl From<Level> for tracing::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Trace => Self::TRACE,
            Level::Debug => Self::DEBUG,
            Level::Info => Self::INFO,
            Level::Warn => Self::WARN,
            Level::Error => Self::ERROR,
        }
    }
}

/// Reflects formatters in `tracing_subscriber::fmt::format`
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// See `tracing_subscriber::fmt::format::Full`
    #[default]
    Full,
    /// See `tracing_subscriber::fmt::format::Compact`
    Compact,
    /// See `tracing_subscriber::fmt::format::Pretty`
    Pretty,
    /// See `tracing_subscriber::fmt::format::Json`
    Json,
}

/// 'Logger' section as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct UserLayer {
    /// Level of logging verbosity
    pub level: Option<Level>,
    /// Output format
    pub format: Option<Format>,
}

impl UserLayer {
    /// Fill the missing fields with defaults.
    pub fn complete(self) -> Config {
        Config {
            level: self.level.unwrap_or_default(),
            format: self.format.unwrap_or_default(),
        }
    }
}

/// Complete logger configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Config {
    /// Level of logging verbosity
    pub level: Level,
    /// Output format
    pub format: Format,
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn serialize_pretty_format_in_lowercase() {
        let value = Format::Pretty;
        let actual = serde_json::to_string(&value).unwrap();
        assert_eq!("\"pretty\"", actual);
    }

    #[test]
    fn level_parses_python_style_names() {
        assert_eq!("info".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("WARNING".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("CRITICAL".parse::<Level>().unwrap(), Level::Error);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn missing_fields_complete_to_defaults() {
        let config = UserLayer {
            level: Some(Level::Debug),
            format: None,
        }
        .complete();
        assert_eq!(config.level, Level::Debug);
        assert_eq!(config.format, Format::Full);
    }
}
