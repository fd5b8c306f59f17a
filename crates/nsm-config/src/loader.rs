//! Configuration loader with multi-source merging.

use crate::{ConfigError, NsmConfig, Paths};
use std::env;
use std::path::{Path, PathBuf};

/// Loads [`NsmConfig`] from defaults, config files, and environment
/// variables, in that precedence order.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current directory.
    #[must_use]
    pub fn new() -> Self {
        ConfigLoader {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "NSM".to_string(),
        }
    }

    #[must_use]
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads configuration from, in increasing precedence order: built-in
    /// defaults, the per-user config file, the project config file, the
    /// local (gitignored) override file, and `<prefix>_*` environment
    /// variables.
    pub fn load(self) -> Result<NsmConfig, ConfigError> {
        let mut builder = config::Config::builder();

        let defaults = NsmConfig::default();
        builder = builder.add_source(
            config::Config::try_from(&defaults)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?,
        );

        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let nsm_config: NsmConfig = built
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        validate(&nsm_config)?;

        Ok(nsm_config)
    }

    /// Loads configuration or falls back to defaults on any error.
    #[must_use]
    pub fn load_or_default(self) -> NsmConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &NsmConfig) -> Result<(), ConfigError> {
    if config.timeouts.default_client_timeout_ms > 60_000 {
        return Err(ConfigError::ValidationError(format!(
            "timeouts.default_client_timeout_ms must be <= 60000, got {}",
            config.timeouts.default_client_timeout_ms
        )));
    }
    if config.timeouts.aggregate_ceiling_ms == 0 {
        return Err(ConfigError::ValidationError(
            "timeouts.aggregate_ceiling_ms must be greater than 0".into(),
        ));
    }
    if config.daemon.socket_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "daemon.socket_path must not be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .load()
            .expect("defaults should load");

        assert_eq!(config.timeouts.default_client_timeout_ms, 5_000);
        assert_eq!(config.timeouts.aggregate_ceiling_ms, 120_000);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn project_config_overrides_defaults() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("nsm.toml"),
            r#"
[timeouts]
default_client_timeout_ms = 2500

[logging]
filter = "nsm_core=debug"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .load()
            .expect("project config should load");

        assert_eq!(config.timeouts.default_client_timeout_ms, 2500);
        assert_eq!(config.logging.filter, "nsm_core=debug");
    }

    #[test]
    fn local_config_overrides_project_config() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("nsm.toml"),
            "[timeouts]\ndefault_client_timeout_ms = 2500\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("nsm.local.toml"),
            "[timeouts]\ndefault_client_timeout_ms = 1000\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .load()
            .expect("local override should load");

        assert_eq!(config.timeouts.default_client_timeout_ms, 1000);
    }

    #[test]
    fn rejects_out_of_range_default_timeout() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("nsm.toml"),
            "[timeouts]\ndefault_client_timeout_ms = 999999\n",
        )
        .unwrap();

        let result = ConfigLoader::new().with_project_dir(temp_dir.path()).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn rejects_zero_aggregate_ceiling() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("nsm.toml"),
            "[timeouts]\naggregate_ceiling_ms = 0\n",
        )
        .unwrap();

        let result = ConfigLoader::new().with_project_dir(temp_dir.path()).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn load_or_default_never_panics_on_bad_project_dir() {
        let config = ConfigLoader::new()
            .with_project_dir("/nonexistent/path/for/nsm-config-test")
            .load_or_default();
        assert_eq!(config.timeouts.default_client_timeout_ms, 5_000);
    }
}
