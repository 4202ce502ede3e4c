use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Placeholder in monitor arguments that is replaced by the target's PID.
pub const PID_PLACEHOLDER: &str = "{pid}";

/// Top-level launcher configuration.
///
/// The defaults are the fixed call sites: `./bin/ws_debug` profiled by
/// `/usr/bin/top -b -p {pid}`. A TOML file is only read when the CLI is
/// given `--config`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LauncherConfig {
    pub target: TargetConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub command: PathBuf,
    /// Argument template; every `{pid}` is substituted at launch time.
    pub args: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("./bin/ws_debug"),
            args: Vec::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("/usr/bin/top"),
            args: vec![
                "-b".to_string(),
                "-p".to_string(),
                PID_PLACEHOLDER.to_string(),
            ],
        }
    }
}

/// Errors produced while loading a config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load a launcher config from a TOML file. Missing keys fall back to defaults.
pub fn load_config(path: &Path) -> Result<LauncherConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fixed_call_sites() {
        let config = LauncherConfig::default();
        assert_eq!(config.target.command, PathBuf::from("./bin/ws_debug"));
        assert!(config.target.args.is_empty());
        assert_eq!(config.monitor.command, PathBuf::from("/usr/bin/top"));
        assert_eq!(config.monitor.args, vec!["-b", "-p", "{pid}"]);
    }

    #[test]
    fn test_load_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.toml");
        std::fs::write(
            &path,
            "[target]\ncommand = \"/bin/sleep\"\nargs = [\"1\"]\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.target.command, PathBuf::from("/bin/sleep"));
        assert_eq!(config.target.args, vec!["1"]);
        assert_eq!(config.monitor.command, PathBuf::from("/usr/bin/top"));
    }

    #[test]
    fn test_load_empty_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.toml");
        std::fs::write(&path, "").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.target.command, PathBuf::from("./bin/ws_debug"));
        assert_eq!(config.monitor.args, vec!["-b", "-p", "{pid}"]);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let err = load_config(Path::new("/nonexistent/launcher.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("failed to read config"));
    }

    #[test]
    fn test_load_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.toml");
        std::fs::write(&path, "[monitor\ncommand = ").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
