//! Runtime configuration taken from the environment.

use crate::classify::Codename;
use crate::invoke::Strategy;
use crate::Result;
use std::env::VarError;

/// Forces the reported codename, e.g. `UARCH_CORETYPE=haswell`.
pub const CORETYPE_VAR: &str = "UARCH_CORETYPE";
/// Selects the cpuid backend, `intrinsic` or `generated`.
pub const INVOKER_VAR: &str = "UARCH_INVOKER";

/// Detection settings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Codename to report regardless of what the processor says.
    pub coretype: Option<Codename>,
    /// How `cpuid` is issued.
    pub strategy: Strategy,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Config::from_lookup(|key| std::env::var(key))
    }

    /// Read the configuration through `lookup`, which behaves like `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, VarError>,
    {
        let coretype = match optional(lookup(CORETYPE_VAR))? {
            Some(v) => Some(v.parse()?),
            None => None,
        };
        let strategy = match optional(lookup(INVOKER_VAR))? {
            Some(v) => v.parse()?,
            None => Strategy::default(),
        };
        Ok(Config { coretype, strategy })
    }
}

/// Unset and blank variables are both `None`.
fn optional(var: std::result::Result<String, VarError>) -> Result<Option<String>> {
    match var {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
