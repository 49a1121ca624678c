use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file")]
    ReadFailed(#[source] std::io::Error),
    #[error("failed to write config file")]
    WriteFailed(#[source] std::io::Error),
    #[error("failed to parse config file")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: Node,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub notify: Notify,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Node {
    /// Stable node identity; generated once and written back if absent
    pub id: Option<String>,
    pub hostname: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Database {
    pub path: String,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: "vigil.db".into() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Scheduler {
    /// Heartbeat cadence; the liveness window is three times this
    pub heartbeat_seconds: u64,
    /// How often the master recomputes the partition table
    pub partition_seconds: u64,
    /// Probe sweep cadence; per-monitor intervals gate actual dispatch
    pub sweep_seconds: u64,
    /// Upper bound on concurrently running probes
    pub max_concurrent_probes: usize,
    /// Default probe timeout when a monitor does not set one
    pub default_timeout_seconds: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            heartbeat_seconds: 6,
            partition_seconds: 10,
            sweep_seconds: 25,
            max_concurrent_probes: 16,
            default_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Notify {
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub send_timeout_seconds: u64,
}

impl Default for Notify {
    fn default() -> Self {
        Self { retry_attempts: 3, backoff_base_ms: 500, send_timeout_seconds: 10 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Node")?;
        write_1(f, "ID", &self.node.id.as_deref().unwrap_or("(generated)"))?;
        write_1(f, "Region", &self.node.region.as_deref().unwrap_or("(none)"))?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Heartbeat Interval (s)", &self.scheduler.heartbeat_seconds)?;
        write_1(f, "Partition Interval (s)", &self.scheduler.partition_seconds)?;
        write_1(f, "Sweep Interval (s)", &self.scheduler.sweep_seconds)?;
        write_1(f, "Max Concurrent Probes", &self.scheduler.max_concurrent_probes)?;
        write_title_1(f, "Notify")?;
        write_1(f, "Retry Attempts", &self.notify.retry_attempts)?;
        write_1(f, "Backoff Base (ms)", &self.notify.backoff_base_ms)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config: Self = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str())?
        } else {
            Self::default()
        };

        // The node ID must survive restarts, or sticky assignment breaks
        // and dead rows pile up in the node registry: mint it once and
        // write it back
        if config.node.id.is_none() {
            config.node.id = Some(uuid::Uuid::new_v4().to_string());
            config.write_config(&config_path)?;
        }

        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_cadences() {
        let config = Config::default();
        assert_eq!(config.scheduler.heartbeat_seconds, 6);
        assert_eq!(config.scheduler.partition_seconds, 10);
        assert_eq!(config.scheduler.sweep_seconds, 25);
        assert_eq!(config.notify.retry_attempts, 3);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [node]
            id = "node-a"

            [scheduler]
            heartbeat_seconds = 3
            partition_seconds = 10
            sweep_seconds = 25
            max_concurrent_probes = 4
            default_timeout_seconds = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.node.id.as_deref(), Some("node-a"));
        assert_eq!(config.scheduler.heartbeat_seconds, 3);
        assert_eq!(config.database.path, "vigil.db");
    }

    #[test]
    fn test_generated_node_id_is_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let first = Config::from_config(Some(&path)).unwrap();
        let id = first.node.id.clone().expect("id generated on first run");

        // A restart reads the same identity back instead of minting a new one
        let second = Config::from_config(Some(&path)).unwrap();
        assert_eq!(second.node.id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::default();
        config.write_config(&path).unwrap();

        let reloaded = Config::from_config(Some(&path)).unwrap();
        assert_eq!(reloaded.scheduler.sweep_seconds, config.scheduler.sweep_seconds);
    }
}
