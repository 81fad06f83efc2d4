//! Configuration loading for sitedrop-daemon.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub daemon: Option<DaemonConfig>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct DaemonConfig {
    pub socket: Option<PathBuf>,
    pub autostart: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
    pub max_posts: Option<usize>,
}

impl Config {
    pub fn daemon_socket_path(&self) -> Option<PathBuf> {
        self.daemon
            .as_ref()
            .and_then(|daemon| daemon.socket.clone())
    }

    pub fn autostart(&self) -> bool {
        self.daemon
            .as_ref()
            .and_then(|daemon| daemon.autostart)
            .unwrap_or(true)
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        self.storage
            .as_ref()
            .and_then(|storage| storage.db_path.clone())
    }

    /// Retention cap override. Defaults to the library cap when absent.
    pub fn max_posts(&self) -> usize {
        self.storage
            .as_ref()
            .and_then(|storage| storage.max_posts)
            .unwrap_or(sitedrop_core::MAX_POSTS)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("", "", "sitedrop").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.daemon_socket_path().is_none());
        assert!(config.db_path().is_none());
        assert!(config.autostart());
        assert_eq!(config.max_posts(), sitedrop_core::MAX_POSTS);
    }

    #[test]
    fn test_max_posts_configured() {
        let config = Config {
            storage: Some(StorageConfig {
                db_path: None,
                max_posts: Some(100),
            }),
            ..Default::default()
        };
        assert_eq!(config.max_posts(), 100);
    }

    #[test]
    fn test_daemon_socket_path_configured() {
        let config = Config {
            daemon: Some(DaemonConfig {
                socket: Some(PathBuf::from("/tmp/sitedrop-test.sock")),
                autostart: None,
            }),
            ..Default::default()
        };

        assert_eq!(
            config.daemon_socket_path().as_deref(),
            Some(Path::new("/tmp/sitedrop-test.sock"))
        );
    }

    #[test]
    fn test_load_config_missing_file_is_default() {
        let config = load_config(Path::new("/nonexistent/sitedrop/config.toml")).unwrap();
        assert!(config.daemon.is_none());
        assert!(config.storage.is_none());
    }

    #[test]
    fn test_load_config_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[daemon]\nsocket = \"/tmp/sd.sock\"\nautostart = false\n\n\
             [storage]\ndb_path = \"/tmp/sd.db\"\nmax_posts = 50\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(
            config.daemon_socket_path().as_deref(),
            Some(Path::new("/tmp/sd.sock"))
        );
        assert!(!config.autostart());
        assert_eq!(config.db_path().as_deref(), Some(Path::new("/tmp/sd.db")));
        assert_eq!(config.max_posts(), 50);
    }
}
