use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend root, e.g. "http://localhost:8000"
    pub base_url: Option<String>,
    /// Mode used when none is given on the command line
    pub default_mode: Option<String>,
    /// Regex whose first capture group names the agent a feedback reply is for
    pub mention_pattern: Option<String>,
    /// Cancel a turn after this many seconds; 0 or unset means no limit
    pub turn_timeout_secs: Option<u64>,
    /// Display order for team agents, keyed by mode name
    /// e.g. testcase = ["TestCase_Analyst", "TestCase_Writer"]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gates: BTreeMap<String, Vec<String>>,
    /// Where session ids are cached; defaults to the platform data directory
    pub session_file: Option<PathBuf>,
    /// Directory for markdown exports; defaults to the working directory
    pub export_dir: Option<PathBuf>,
}

/// Get a user-friendly display string for a path, using `~` for the home
/// directory on Unix-like systems.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
