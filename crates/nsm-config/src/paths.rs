//! XDG-aware path discovery for the daemon's on-disk configuration files.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    #[must_use]
    pub fn new() -> Self {
        Paths {
            project_dirs: ProjectDirs::from("org", "genivi", "nsm"),
        }
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().join("config.toml"))
            .ok_or_else(|| ConfigError::XdgError("could not determine user config directory".into()))
    }

    #[must_use]
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("nsm.toml")
    }

    #[must_use]
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("nsm.local.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Paths::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn project_and_local_file_names() {
        let temp = tempdir().unwrap();
        assert_eq!(
            Paths::project_config_file(temp.path()),
            temp.path().join("nsm.toml")
        );
        assert_eq!(
            Paths::local_config_file(temp.path()),
            temp.path().join("nsm.local.toml")
        );
    }
}
