//! Where pipelines keep their files.
//!
//! ```text
//! $LOADFLOW_HOME                 default ~/.loadflow
//! ├── logs/
//! └── pipelines/<pipeline_name>/ pipeline working directory
//!     ├── normalize/
//!     └── load/
//! ```
//!
//! Nothing here touches the filesystem; storages create their roots.

use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "LOADFLOW_HOME";

const HOME_FOLDER: &str = ".loadflow";
const PIPELINES_FOLDER: &str = "pipelines";
const LOGS_FOLDER: &str = "logs";
const NORMALIZE_FOLDER: &str = "normalize";
const LOAD_FOLDER: &str = "load";

/// `$LOADFLOW_HOME` when set, else `.loadflow` under the user's home
/// directory, else under the current directory.
pub fn loadflow_home() -> PathBuf {
    if let Some(path) = std::env::var_os(HOME_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HOME_FOLDER)
}

pub fn pipeline_dir(pipeline_name: &str) -> PathBuf {
    loadflow_home().join(PIPELINES_FOLDER).join(pipeline_name)
}

pub fn logs_dir() -> PathBuf {
    loadflow_home().join(LOGS_FOLDER)
}

pub fn normalize_volume(pipeline_dir: &Path) -> PathBuf {
    pipeline_dir.join(NORMALIZE_FOLDER)
}

pub fn load_volume(pipeline_dir: &Path) -> PathBuf {
    pipeline_dir.join(LOAD_FOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_layout() {
        let dir = pipeline_dir("events");
        assert!(dir.ends_with("pipelines/events"));
        assert!(dir.starts_with(loadflow_home()));
        assert_eq!(normalize_volume(&dir), dir.join("normalize"));
        assert_eq!(load_volume(&dir), dir.join("load"));
    }
}
