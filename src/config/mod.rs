use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bridge::SYNTHETIC_PROGRAM_NAME;
use crate::lifecycle::CONFIG_FILE_NAME;

/// Launcher settings. The native server's own `server.toml` is never read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherSettings {
    /// Directory holding `server.toml`; relative paths resolve against the working directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Token passed as `argv[0]` to the native entry point
    #[serde(default = "default_program_name")]
    pub program_name: String,

    /// Arguments appended after `--config <path>`
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Load native artifacts from this directory instead of the embedded bundle
    #[serde(default)]
    pub natives_dir: Option<PathBuf>,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_program_name() -> String {
    SYNTHETIC_PROGRAM_NAME.to_string()
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            program_name: default_program_name(),
            extra_args: Vec::new(),
            natives_dir: None,
        }
    }
}

impl LauncherSettings {
    /// Load settings from the default location, or defaults if there is no file
    pub fn load_default() -> Result<Self> {
        let settings_path = Self::default_settings_path()?;

        if settings_path.exists() {
            Self::load_from_file(&settings_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load settings from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read settings file {}", path.as_ref().display())
        })?;

        let settings: LauncherSettings =
            serde_yaml::from_str(&contents).context("Failed to parse settings file")?;

        Ok(settings)
    }

    /// Save settings to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_yaml::to_string(self).context("Failed to serialize settings")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        fs::write(path.as_ref(), contents).context("Failed to write settings file")?;

        Ok(())
    }

    /// Get default settings path
    pub fn default_settings_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;

        Ok(home.join(".limbo-bridge").join("settings.yaml"))
    }

    /// `<data_dir>/server.toml`, made absolute against the working directory
    pub fn config_path(&self) -> Result<PathBuf> {
        let data_dir = if self.data_dir.is_absolute() {
            self.data_dir.clone()
        } else {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(&self.data_dir)
        };
        Ok(data_dir.join(CONFIG_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = LauncherSettings::default();
        assert_eq!(settings.data_dir, PathBuf::from("."));
        assert_eq!(settings.program_name, SYNTHETIC_PROGRAM_NAME);
        assert!(settings.extra_args.is_empty());
        assert!(settings.natives_dir.is_none());
    }

    #[test]
    fn test_settings_deserialization() {
        let yaml = r#"
data_dir: /srv/limbo
extra_args:
  - "--verbose"
"#;
        let settings: LauncherSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/srv/limbo"));
        assert_eq!(settings.program_name, SYNTHETIC_PROGRAM_NAME);
        assert_eq!(settings.extra_args, vec!["--verbose".to_string()]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.yaml");
        let settings = LauncherSettings {
            data_dir: dir.path().join("data"),
            program_name: "custom".to_string(),
            extra_args: vec!["-v".to_string()],
            natives_dir: Some(dir.path().join("natives")),
        };

        settings.save_to_file(&path).unwrap();
        assert_eq!(LauncherSettings::load_from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_config_path_is_absolute() {
        let settings = LauncherSettings::default();
        let path = settings.config_path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with(CONFIG_FILE_NAME));
    }
}
