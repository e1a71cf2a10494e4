use anyhow::{Context, Result};
use serde_json::Value;
use std::process::Command;

use super::{CommandExecutor, probe, query};
use crate::services::EncryptionService;

/// Shown instead of a real UUID when the container was never formatted.
const DRY_RUN_UUID: &str = "00000000-0000-0000-0000-000000000000";

pub struct Cryptsetup {
    executor: CommandExecutor,
}

impl Cryptsetup {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

impl EncryptionService for Cryptsetup {
    fn format(&self, partition: &str) -> Result<()> {
        // Passphrase entry happens on the terminal; cryptsetup asks twice.
        self.executor.run(
            Command::new("cryptsetup")
                .args(["luksFormat", "--type", "luks2", "--verify-passphrase"])
                .arg(partition),
        )
    }

    fn container_uuid(&self, partition: &str) -> Result<String> {
        if self.executor.dry_run {
            return Ok(DRY_RUN_UUID.to_string());
        }
        let uuid = query("cryptsetup", &["luksUUID", partition])?;
        let uuid = uuid.trim();
        if uuid.is_empty() {
            anyhow::bail!("cryptsetup reported no UUID for {partition}");
        }
        Ok(uuid.to_string())
    }

    fn open(&self, partition: &str, container_name: &str) -> Result<()> {
        self.executor
            .run(Command::new("cryptsetup").arg("open").arg(partition).arg(container_name))
    }

    fn grow_container(&self, container_name: &str) -> Result<()> {
        self.executor
            .run(Command::new("cryptsetup").arg("resize").arg(container_name))
    }

    fn open_container_of(&self, partition: &str) -> Result<Option<String>> {
        let Some(json) = probe("lsblk", &["-J", "-o", "NAME,TYPE", partition])? else {
            return Ok(None);
        };
        parse_crypt_child(&json)
    }
}

fn parse_crypt_child(json: &str) -> Result<Option<String>> {
    let root: Value = serde_json::from_str(json).context("parsing lsblk output")?;
    let children = root
        .get("blockdevices")
        .and_then(|v| v.as_array())
        .and_then(|devices| devices.first())
        .and_then(|device| device.get("children"))
        .and_then(|v| v.as_array());

    Ok(children.and_then(|children| {
        children
            .iter()
            .find(|child| child.get("type").and_then(|v| v.as_str()) == Some("crypt"))
            .and_then(|child| child.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }))
}
