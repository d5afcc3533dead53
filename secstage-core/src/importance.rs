//! Progress message importance
//!
//! Progress messages ("Copying ...", "Deleting ...") are emitted at a level
//! chosen by the caller, so a build can surface them or keep them quiet.

use std::fmt;
use std::str::FromStr;

/// Level at which progress messages are logged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Importance {
    /// Logged at `info`
    High,
    /// Logged at `debug`
    #[default]
    Normal,
    /// Logged at `trace`
    Low,
}

impl Importance {
    /// Parse case-insensitively, falling back to `Normal` for blank or unknown values
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn log(self, message: impl fmt::Display) {
        match self {
            Self::High => tracing::info!("{}", message),
            Self::Normal => tracing::debug!("{}", message),
            Self::Low => tracing::trace!("{}", message),
        }
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown importance '{}', expected high, normal or low", other)),
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        f.write_str(name)
    }
}
