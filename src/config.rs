//! Agent options.
//!
//! Options arrive as the agent argument string, a comma-separated list of
//! `key=value` pairs:
//!
//! ```text
//! on_error=skip,retransform=true,preset=eclipse
//! ```

use std::str::FromStr;

use crate::error::ConfigError;

/// What the transformer does when a class cannot be patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Report the error to the host, which aborts loading the class.
    #[default]
    Abort,
    /// Log the error and let the class load unpatched.
    LeaveUnpatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    Eclipse,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatcherConfig {
    pub on_error: FailurePolicy,
    /// Retransform target classes that were loaded before the agent.
    pub retransform: bool,
    pub preset: Preset,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self { on_error: FailurePolicy::Abort, retransform: false, preset: Preset::Eclipse }
    }
}

impl FromStr for PatcherConfig {
    type Err = ConfigError;

    fn from_str(options: &str) -> Result<Self, Self::Err> {
        let mut config = Self::default();
        for option in options.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = option.split_once('=').ok_or_else(|| ConfigError::MissingValue(option.to_owned()))?;
            let (key, value) = (key.trim(), value.trim());
            let invalid = || ConfigError::InvalidValue { key: key.to_owned(), value: value.to_owned() };
            match key {
                "on_error" => {
                    config.on_error = match value {
                        "abort" => FailurePolicy::Abort,
                        "skip" => FailurePolicy::LeaveUnpatched,
                        _ => return Err(invalid()),
                    }
                }
                "retransform" => config.retransform = value.parse().map_err(|_| invalid())?,
                "preset" => {
                    config.preset = match value {
                        "eclipse" => Preset::Eclipse,
                        "none" => Preset::None,
                        _ => return Err(invalid()),
                    }
                }
                _ => return Err(ConfigError::UnknownKey(key.to_owned())),
            }
        }
        Ok(config)
    }
}
