//! Monitor severity levels
//!
//! Levels gate both hierarchy tracking and processor routing. They are totally
//! ordered: `Debug < Info < Essential`.

use crate::error::LevelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Importance of a monitor, compared against group and processor thresholds
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Diagnostic detail, normally filtered out
    #[serde(alias = "DEBUG", alias = "Debug")]
    Debug,
    /// Regular operational monitors
    #[default]
    #[serde(alias = "INFO", alias = "Info")]
    Info,
    /// Monitors that must reach every configured backend
    #[serde(alias = "ESSENTIAL", alias = "Essential")]
    Essential,
}

impl Level {
    /// All levels in ascending order
    pub const ALL: [Level; 3] = [Level::Debug, Level::Info, Level::Essential];

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Level::Debug => 0,
            Level::Info => 1,
            Level::Essential => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Debug,
            1 => Level::Info,
            _ => Level::Essential,
        }
    }

    /// Lowercase name used in configuration files and attribute values
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Essential => "essential",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = LevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "essential" => Ok(Level::Essential),
            _ => Err(LevelError::Invalid(s.to_string())),
        }
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for Level {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        *g.choose(&Level::ALL).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Essential);
        assert!(Level::Debug < Level::Essential);
    }

    #[test]
    fn test_level_default_is_info() {
        assert_eq!(Level::default(), Level::Info);
    }

    #[test]
    fn test_level_parse_is_case_insensitive() {
        assert_eq!("DEBUG".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!(" Info ".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("essential".parse::<Level>().unwrap(), Level::Essential);
    }

    #[test]
    fn test_level_parse_rejects_unknown() {
        let err = "verbose".parse::<Level>().unwrap_err();
        assert_eq!(err, LevelError::Invalid("verbose".to_string()));
    }

    #[test]
    fn test_level_serialization() {
        assert_eq!(serde_json::to_string(&Level::Essential).unwrap(), "\"essential\"");
        let parsed: Level = serde_json::from_str("\"ESSENTIAL\"").unwrap();
        assert_eq!(parsed, Level::Essential);
    }

    #[test]
    fn test_level_u8_mapping_preserves_order() {
        for level in Level::ALL {
            assert_eq!(Level::from_u8(level.as_u8()), level);
        }
    }
}
