// src/infra/paths.rs — Config path management
//
// All paths respect the RIFF_HOME environment variable for isolation.
// When RIFF_HOME is set, config lives under that directory; otherwise ~/.riff/.

use std::path::PathBuf;

/// Returns the RIFF_HOME override, if set.
fn riff_home() -> Option<PathBuf> {
    std::env::var_os("RIFF_HOME").map(PathBuf::from)
}

/// Home directory, if the platform can tell us one.
pub fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Configuration directory: $RIFF_HOME/ or ~/.riff/
pub fn config_dir() -> PathBuf {
    if let Some(home) = riff_home() {
        return home;
    }
    dirs_home()
        .map(|h| h.join(".riff"))
        .unwrap_or_else(|| PathBuf::from(".riff"))
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
