//! Default locations.

use std::path::PathBuf;

/// `$APL_HOME`, else `~/.apl`. `None` when neither is available.
pub fn apl_home() -> Option<PathBuf> {
    match std::env::var_os("APL_HOME") {
        Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
        _ => dirs::home_dir().map(|home| home.join(".apl")),
    }
}

/// Scratch root for extraction: `<apl home>/tmp`, on the same volume as
/// the install tree so relocation is a rename. Falls back to the system
/// temp dir.
pub fn scratch_root() -> PathBuf {
    apl_home().map_or_else(std::env::temp_dir, |home| home.join("tmp"))
}
