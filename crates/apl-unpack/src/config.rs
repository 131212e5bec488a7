//! Extraction configuration.
//!
//! Defaults suit interactive installs. [`UnpackConfig::from_env`] layers
//! `APL_*` environment overrides on top, the same way the rest of APL reads
//! its settings.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for a single extraction session.
#[derive(Debug, Clone)]
pub struct UnpackConfig {
    /// Parent directory for per-call scratch directories.
    pub scratch_root: PathBuf,
    /// Total eject attempts per mounted volume (polite first, forced last).
    pub eject_attempts: u32,
    /// Pause between eject attempts.
    pub eject_backoff: Duration,
    /// Kill an external tool that runs longer than this.
    pub tool_timeout: Option<Duration>,
    /// Ceiling on stacked compression layers.
    pub max_nesting_depth: usize,
    /// Logical tool name -> binary path overrides (`APL_TOOL_<NAME>`).
    pub tool_overrides: HashMap<String, PathBuf>,
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self {
            scratch_root: crate::paths::scratch_root(),
            eject_attempts: 3,
            eject_backoff: Duration::from_secs(1),
            tool_timeout: None,
            max_nesting_depth: 16,
            tool_overrides: HashMap::new(),
        }
    }
}

impl UnpackConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Effect |
    /// |---|---|
    /// | `APL_UNPACK_TMP` | scratch root |
    /// | `APL_UNPACK_EJECT_ATTEMPTS` | eject attempts (min 1) |
    /// | `APL_UNPACK_EJECT_BACKOFF_MS` | pause between eject attempts |
    /// | `APL_UNPACK_TOOL_TIMEOUT_SECS` | per-tool timeout |
    /// | `APL_TOOL_<NAME>` | binary for logical tool `<name>` |
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub(crate) fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut config = Self::default();

        for (key, value) in vars {
            match key.as_str() {
                "APL_UNPACK_TMP" if !value.is_empty() => {
                    config.scratch_root = PathBuf::from(value);
                }
                "APL_UNPACK_EJECT_ATTEMPTS" => {
                    if let Ok(n) = value.parse::<u32>() {
                        config.eject_attempts = n.max(1);
                    }
                }
                "APL_UNPACK_EJECT_BACKOFF_MS" => {
                    if let Ok(ms) = value.parse::<u64>() {
                        config.eject_backoff = Duration::from_millis(ms);
                    }
                }
                "APL_UNPACK_TOOL_TIMEOUT_SECS" => {
                    config.tool_timeout = value
                        .parse::<u64>()
                        .ok()
                        .filter(|s| *s > 0)
                        .map(Duration::from_secs);
                }
                _ => {
                    if let Some(tool) = key.strip_prefix("APL_TOOL_") {
                        if !value.is_empty() {
                            let name = tool.to_lowercase().replace('_', "-");
                            config.tool_overrides.insert(name, PathBuf::from(value));
                        }
                    }
                }
            }
        }

        config
    }
}
