//! Runtime configuration: listener, handshake, transfer and launch settings.
//!
//! Values come from an optional JSON file; every field has a default, and the
//! command line overrides whatever the file sets.

use crate::error::{RemoteError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Interface the remote-control listener binds.
    pub host: String,
    pub port: u16,
    /// Window after accept during which a valid key must arrive.
    pub handshake_timeout_ms: u64,
    /// Upper bound of a single transfer write.
    pub chunk_size: usize,
    /// Open the listener as soon as the service starts.
    pub listen_on_start: bool,
    #[serde(flatten)]
    pub launch: LaunchSettings,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: shared::DEFAULT_PORT,
            handshake_timeout_ms: 3000,
            chunk_size: crate::transfer::DEFAULT_CHUNK_SIZE,
            listen_on_start: true,
            launch: LaunchSettings::default(),
        }
    }
}

impl RemoteConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RemoteError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;

        serde_json::from_str(&content).map_err(|e| RemoteError::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RemoteError::Config {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }
        if self.handshake_timeout_ms == 0 {
            return Err(RemoteError::Config {
                message: "handshake_timeout_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// How the game server process is launched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// Server jar, or a `.bat` script run through `cmd.exe`.
    pub server_path: Option<PathBuf>,
    /// Java executable; `java` from `PATH` when unset.
    pub java_path: Option<PathBuf>,
    /// Initial heap in MiB, omitted when 0.
    pub xms: u32,
    /// Maximum heap in MiB, omitted when 0.
    pub xmx: u32,
    pub additional_parameters: String,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            server_path: None,
            java_path: None,
            xms: 512,
            xmx: 512,
            additional_parameters: String::new(),
        }
    }
}

impl LaunchSettings {
    /// Directory holding the server file; the process runs there.
    pub fn working_dir(&self) -> Option<PathBuf> {
        let server_path = self.server_path.as_ref()?;
        match server_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Some(parent.to_path_buf()),
            _ => Some(PathBuf::from(".")),
        }
    }

    pub fn properties_path(&self) -> Option<PathBuf> {
        self.working_dir().map(|dir| dir.join("server.properties"))
    }

    /// Log file the server itself keeps, exported by `file|` requests.
    pub fn latest_log_path(&self) -> Option<PathBuf> {
        self.working_dir()
            .map(|dir| dir.join("logs").join("latest.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RemoteConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:7777");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(3));
        assert_eq!(config.chunk_size, 4096);
        assert!(config.listen_on_start);
        assert_eq!(config.launch.xms, 512);
        assert_eq!(config.launch.xmx, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: RemoteConfig = serde_json::from_str(
            r#"{ "port": 9000, "server_path": "/srv/mc/server.jar", "xmx": 2048 }"#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.launch.xmx, 2048);
        assert_eq!(config.launch.xms, 512);
        assert_eq!(
            config.launch.server_path,
            Some(PathBuf::from("/srv/mc/server.jar"))
        );
    }

    #[test]
    fn test_derived_paths() {
        let launch = LaunchSettings {
            server_path: Some(PathBuf::from("/srv/mc/server.jar")),
            ..LaunchSettings::default()
        };
        assert_eq!(launch.working_dir(), Some(PathBuf::from("/srv/mc")));
        assert_eq!(
            launch.latest_log_path(),
            Some(PathBuf::from("/srv/mc/logs/latest.log"))
        );

        let bare = LaunchSettings {
            server_path: Some(PathBuf::from("server.jar")),
            ..LaunchSettings::default()
        };
        assert_eq!(bare.working_dir(), Some(PathBuf::from(".")));
        assert_eq!(
            bare.properties_path(),
            Some(PathBuf::from("./server.properties"))
        );

        assert_eq!(LaunchSettings::default().latest_log_path(), None);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = RemoteConfig {
            chunk_size: 0,
            ..RemoteConfig::default()
        };
        assert!(matches!(config.validate(), Err(RemoteError::Config { .. })));

        let config = RemoteConfig {
            handshake_timeout_ms: 0,
            ..RemoteConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = RemoteConfig::from_file(Path::new("/nonexistent/remote.json")).unwrap_err();
        assert!(matches!(err, RemoteError::Config { .. }));
    }
}
