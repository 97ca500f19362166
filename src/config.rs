//! Configuration file and `REGWALK_*` environment overrides.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::infrastructure::{Credentials, DEFAULT_PROBE_PORT, DEFAULT_PROBE_TIMEOUT_MS};

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "regwalk.toml";
/// Worker threads used by `--parallel` when nothing else is set.
pub const DEFAULT_WORKERS: usize = 8;

/// Path of an explicit config file.
pub const CONFIG_ENV: &str = "REGWALK_CONFIG";
/// Overrides `snapshot_dir`.
pub const SNAPSHOT_DIR_ENV: &str = "REGWALK_SNAPSHOT_DIR";
/// Overrides `orchestrator.service_url`.
pub const SERVICE_URL_ENV: &str = "REGWALK_SERVICE_URL";
/// Overrides `orchestrator.user`.
pub const USER_ENV: &str = "REGWALK_USER";
/// The only source of the orchestrator password.
pub const PASSWORD_ENV: &str = "REGWALK_PASSWORD";

/// Errors that can occur when loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {}", path.display())]
    Read {
        /// Config file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`Config`].
    #[error("failed to parse config: {}", path.display())]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// `workers = 0`.
    #[error("workers must be at least 1 in {}", path.display())]
    NoWorkers {
        /// Config file.
        path: PathBuf,
    },
}

/// `[probe]` table: TCP reachability check used by `--ping`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Port tried on every host.
    pub port: u16,
    /// Connect timeout per address.
    pub timeout_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PROBE_PORT,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

/// `[orchestrator]` table: web service used by the `job` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Service root URL.
    pub service_url: Option<String>,
    /// Basic-auth user.
    pub user: Option<String>,
    /// Only ever read from the environment.
    #[serde(skip)]
    pub password: Option<String>,
}

impl OrchestratorSettings {
    /// Basic-auth credentials, present when a user is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.user.as_ref().map(|user| Credentials {
            user: user.clone(),
            password: self.password.clone(),
        })
    }
}

/// All application configuration, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one `<host>.toml` registry snapshot per machine.
    /// Without it the live registry is read.
    pub snapshot_dir: Option<PathBuf>,
    /// Hosts enumerated at the same time by `--parallel`.
    pub workers: usize,
    /// Reachability check settings.
    pub probe: ProbeSettings,
    /// Orchestration web service settings.
    pub orchestrator: OrchestratorSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_dir: None,
            workers: DEFAULT_WORKERS,
            probe: ProbeSettings::default(),
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides.
    ///
    /// The file is `$REGWALK_CONFIG` if set, else `regwalk.toml` in `cwd`
    /// when it exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if an explicitly configured file cannot be read.
    /// Returns [`ConfigError::Parse`] if the file is not valid TOML.
    pub fn load(cwd: &Path) -> Result<Self, ConfigError> {
        Self::load_with(cwd, |name| env::var(name).ok())
    }

    /// Same as [`Config::load`] with a custom environment lookup.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_with<F: Fn(&str) -> Option<String>>(
        cwd: &Path,
        lookup: F,
    ) -> Result<Self, ConfigError> {
        let config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(&cwd.join(path))?,
            None => {
                let default_path = cwd.join(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(config.with_env(lookup))
    }

    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML or
    /// sets `workers` to zero.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        if config.workers == 0 {
            return Err(ConfigError::NoWorkers {
                path: path.to_path_buf(),
            });
        }
        Ok(config)
    }

    /// Override settings with the `REGWALK_*` variables found by `lookup`.
    #[must_use]
    pub fn with_env<F: Fn(&str) -> Option<String>>(mut self, lookup: F) -> Self {
        if let Some(dir) = lookup(SNAPSHOT_DIR_ENV) {
            self.snapshot_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup(SERVICE_URL_ENV) {
            self.orchestrator.service_url = Some(url);
        }
        if let Some(user) = lookup(USER_ENV) {
            self.orchestrator.user = Some(user);
        }
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.orchestrator.password = Some(password);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load_with(dir.path(), no_env).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.probe.port, DEFAULT_PROBE_PORT);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "snapshot_dir = \"snapshots\"\n\n[probe]\ntimeout_ms = 250\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path(), no_env).unwrap();
        assert_eq!(config.snapshot_dir, Some(PathBuf::from("snapshots")));
        assert_eq!(config.probe.timeout_ms, 250);
        assert_eq!(config.probe.port, DEFAULT_PROBE_PORT);
        assert_eq!(config.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("custom.toml"),
            "[orchestrator]\nservice_url = \"http://file\"\nuser = \"file-user\"\n",
        )
        .unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (CONFIG_ENV, "custom.toml"),
            (SERVICE_URL_ENV, "http://env"),
            (PASSWORD_ENV, "secret"),
        ]);

        let config =
            Config::load_with(dir.path(), |name| env.get(name).map(|v| (*v).to_owned())).unwrap();
        assert_eq!(config.orchestrator.service_url.as_deref(), Some("http://env"));

        let credentials = config.orchestrator.credentials().unwrap();
        assert_eq!(credentials.user, "file-user");
        assert_eq!(credentials.password.as_deref(), Some("secret"));
    }

    #[test]
    fn password_is_not_read_from_file() {
        let config: Config =
            toml::from_str("[orchestrator]\nuser = \"u\"\npassword = \"p\"\n").unwrap();
        assert!(config.orchestrator.password.is_none());
    }

    #[test]
    fn no_user_means_no_credentials() {
        assert!(Config::default().orchestrator.credentials().is_none());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let err = Config::load_with(dir.path(), |name| {
            (name == CONFIG_ENV).then(|| "absent.toml".to_owned())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "workers = 0\n").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::NoWorkers { .. })
        ));
    }
}
