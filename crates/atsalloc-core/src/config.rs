//! Router configuration.
//!
//! Values can be built directly or read from the environment:
//! - `ATSALLOC_THRESHOLD`: byte count below which requests go to the device.
//!   Accepts an optional binary suffix (`K`, `M`, `G`, with or without `iB`).
//!   `0` disables the device path.
//! - `ATSALLOC_BYTES_LIMIT`: informational ceiling reported in stats.
//! - `ATSALLOC_FREE_ROUTING`: `probe` (default) or `tagged`.

use serde::{Deserialize, Serialize};

use crate::backend::{self, page_size};
use crate::error::ConfigError;

/// Threshold used when none is configured (1 GiB).
pub const DEFAULT_THRESHOLD: usize = 1 << 30;

pub const THRESHOLD_ENV: &str = "ATSALLOC_THRESHOLD";
pub const BYTES_LIMIT_ENV: &str = "ATSALLOC_BYTES_LIMIT";
pub const FREE_ROUTING_ENV: &str = "ATSALLOC_FREE_ROUTING";

/// How the router decides which backend releases a pointer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreeRouting {
    /// Try the device first and fall back to the host when the device reports
    /// an invalid pointer. Only sound while the two address ranges are disjoint.
    #[default]
    Probe,
    /// Route by the placement recorded at allocation time; probe only for
    /// pointers the ledger does not know.
    Tagged,
}

impl FreeRouting {
    /// Parse from string (case-insensitive). Unknown values map to `Probe`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "tagged" | "ledger" | "tag" => Self::Tagged,
            _ => Self::Probe,
        }
    }
}

/// Immutable routing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Requests strictly smaller than this go to the device. Zero disables the device path.
    pub threshold: usize,
    /// Alignment used for every host allocation, regardless of what the caller asks for.
    pub host_alignment: usize,
    pub bytes_limit: Option<usize>,
    pub free_routing: FreeRouting,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            host_alignment: page_size(),
            bytes_limit: None,
            free_routing: FreeRouting::Probe,
        }
    }
}

impl RouterConfig {
    /// Defaults with an explicit threshold.
    #[must_use]
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(THRESHOLD_ENV) {
            config.threshold = parse_byte_size(&raw).ok_or(ConfigError::InvalidByteSize {
                var: THRESHOLD_ENV,
                raw,
            })?;
        }
        if let Some(raw) = lookup(BYTES_LIMIT_ENV) {
            let limit = parse_byte_size(&raw).ok_or(ConfigError::InvalidByteSize {
                var: BYTES_LIMIT_ENV,
                raw,
            })?;
            config.bytes_limit = Some(limit);
        }
        if let Some(raw) = lookup(FREE_ROUTING_ENV) {
            config.free_routing = FreeRouting::from_str_loose(&raw);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !backend::is_valid_host_alignment(self.host_alignment) {
            return Err(ConfigError::InvalidHostAlignment(self.host_alignment));
        }
        Ok(())
    }

    /// True when some requests can reach the device.
    #[must_use]
    pub const fn device_path_enabled(&self) -> bool {
        self.threshold > 0
    }
}

/// Parse `"4096"`, `"64K"`, `"2MiB"`, `"1g"` and friends into a byte count.
#[must_use]
pub fn parse_byte_size(raw: &str) -> Option<usize> {
    let s = raw.trim();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if digits_end == 0 {
        return None;
    }
    let value: usize = s[..digits_end].parse().ok()?;
    let shift = match s[digits_end..].trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        _ => return None,
    };
    value.checked_mul(1usize.checked_shl(shift)?)
}
