//! Operator settings
//!
//! Defaults, optionally overridden by `<root>/berth.toml`, then by the
//! environment.

use crate::error::Result;
use crate::naming::ContainerKind;
use crate::runtime::RegistryAuth;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file name inside the root directory
pub const SETTINGS_FILE: &str = "berth.toml";

/// Environment variable overriding the root directory
pub const ROOT_ENV: &str = "BERTH_ROOT";

/// Pull missing images without asking when set to `true`
pub const PULL_APPROVE_ENV: &str = "BERTH_PULL_APPROVE";

/// Export over existing host files without asking when set to `true`
pub const OVERWRITE_APPROVE_ENV: &str = "BERTH_OVERWRITE_APPROVE";

/// Berth settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Host root holding definitions and data directories
    pub root: PathBuf,
    /// Root directory inside containers
    pub container_root: String,
    /// User owning imported data inside containers
    pub container_user: String,
    /// Image for data containers whose definition names none
    pub data_image: String,
    /// Image for ephemeral exec containers
    pub exec_image: String,
    /// Fallback shell for interactive sessions
    pub shell: String,
    /// Default graceful stop timeout in seconds
    pub stop_timeout: u32,
    /// Pull images without confirmation
    pub pull_approve: bool,
    /// Overwrite host export destinations without confirmation
    pub overwrite_approve: bool,
    /// Credentials for image pulls
    pub registry: Option<RegistryAuth>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: default_root(),
            container_root: "/home/berth/.berth".to_string(),
            container_user: "berth".to_string(),
            data_image: "busybox:latest".to_string(),
            exec_image: "busybox:latest".to_string(),
            shell: "/bin/sh".to_string(),
            stop_timeout: 10,
            pull_approve: false,
            overwrite_approve: false,
            registry: None,
        }
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join(".berth")
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v == "true")
}

impl Settings {
    /// Load settings from the root directory and the environment.
    pub fn load() -> Result<Self> {
        let root = std::env::var_os(ROOT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_root);

        let mut settings = Self::from_root(&root)?;
        settings.apply_env();
        Ok(settings)
    }

    /// Defaults for `root`, merged with `root/berth.toml` when present.
    pub fn from_root(root: &Path) -> Result<Self> {
        let file = root.join(SETTINGS_FILE);
        let mut settings = if file.exists() {
            let content = std::fs::read_to_string(&file)?;
            toml::from_str::<Settings>(&content)?
        } else {
            Settings::default()
        };
        settings.root = root.to_path_buf();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Some(approve) = env_flag(PULL_APPROVE_ENV) {
            self.pull_approve = approve;
        }
        if let Some(approve) = env_flag(OVERWRITE_APPROVE_ENV) {
            self.overwrite_approve = approve;
        }
    }

    /// Directory holding definition files of `kind`.
    pub fn definitions_dir(&self, kind: ContainerKind) -> PathBuf {
        self.root.join(format!("{}s", kind))
    }

    /// Host directory mirroring a data container's contents.
    pub fn data_dir(&self, name: &str) -> PathBuf {
        self.root.join("data").join(name)
    }

    /// Create the root directory layout.
    pub fn ensure_dirs(&self) -> Result<()> {
        for kind in [ContainerKind::Service, ContainerKind::Chain] {
            std::fs::create_dir_all(self.definitions_dir(kind))?;
        }
        std::fs::create_dir_all(self.root.join("data"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.container_user, "berth");
        assert_eq!(settings.stop_timeout, 10);
        assert!(!settings.pull_approve);
    }

    #[test]
    fn test_settings_from_root_file() {
        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join(SETTINGS_FILE),
            "container_user = \"app\"\npull_approve = true\n",
        )
        .unwrap();

        let settings = Settings::from_root(temp.path()).unwrap();
        assert_eq!(settings.container_user, "app");
        assert!(settings.pull_approve);
        assert_eq!(settings.root, temp.path());
        assert_eq!(settings.shell, "/bin/sh");
    }

    #[test]
    fn test_definition_dirs() {
        let temp = tempdir().unwrap();
        let settings = Settings::from_root(temp.path()).unwrap();
        settings.ensure_dirs().unwrap();

        assert!(temp.path().join("services").is_dir());
        assert!(temp.path().join("chains").is_dir());
        assert_eq!(settings.data_dir("x"), temp.path().join("data").join("x"));
    }
}
