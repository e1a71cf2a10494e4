//! Runtime settings.
//!
//! Every field has a serde default, so an absent or partial config file
//! yields a fully populated `Settings`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ExtendError;
use crate::units::Capacity;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cryptgrow/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Mount point of the root filesystem
    #[serde(default = "Settings::default_root_mount")]
    pub root_mount: String,
    /// Mount point of the secondary data filesystem
    #[serde(default = "Settings::default_secondary_mount")]
    pub secondary_mount: String,
    /// Shares below this many GiB are not worth an lvextend call
    #[serde(default = "Settings::default_negligible_threshold")]
    pub negligible_threshold: f64,
    /// Seconds to wait after partition table changes
    #[serde(default = "Settings::default_settle_delay_secs")]
    pub settle_delay_secs: u64,
    #[serde(default = "Settings::default_crypttab_path")]
    pub crypttab_path: PathBuf,
    #[serde(default = "Settings::default_grub_default_path")]
    pub grub_default_path: PathBuf,
    /// Prefix of the mapper name given to newly opened containers
    #[serde(default = "Settings::default_container_prefix")]
    pub container_prefix: String,
    /// Directory that receives the run log
    #[serde(default = "Settings::default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_mount: Self::default_root_mount(),
            secondary_mount: Self::default_secondary_mount(),
            negligible_threshold: Self::default_negligible_threshold(),
            settle_delay_secs: Self::default_settle_delay_secs(),
            crypttab_path: Self::default_crypttab_path(),
            grub_default_path: Self::default_grub_default_path(),
            container_prefix: Self::default_container_prefix(),
            log_dir: Self::default_log_dir(),
        }
    }
}

impl Settings {
    fn default_root_mount() -> String {
        "/".to_string()
    }

    fn default_secondary_mount() -> String {
        "/home".to_string()
    }

    fn default_negligible_threshold() -> f64 {
        0.1
    }

    fn default_settle_delay_secs() -> u64 {
        2
    }

    fn default_crypttab_path() -> PathBuf {
        PathBuf::from("/etc/crypttab")
    }

    fn default_grub_default_path() -> PathBuf {
        PathBuf::from("/etc/default/grub")
    }

    fn default_container_prefix() -> String {
        "luks-".to_string()
    }

    fn default_log_dir() -> PathBuf {
        PathBuf::from(".")
    }

    /// Load settings from `explicit` if given, otherwise from the default
    /// path when it exists. Only an explicitly named file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ExtendError::NotFound(format!(
                        "configuration file {}",
                        path.display()
                    ))
                    .into());
                }
                Self::from_file(path)
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing configuration {}", path.display()))
    }

    pub fn negligible_capacity(&self) -> Capacity {
        Capacity::from_gib_f64(self.negligible_threshold)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}
