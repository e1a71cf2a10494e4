//! Partition tables via lsblk, sfdisk and growpart.

use anyhow::{Context, Result};
use serde_json::Value;
use std::process::Command;

use super::{CommandExecutor, query};
use crate::extend::types::{DiskInfo, PartitionInfo};
use crate::services::{GrowOutcome, PartitionService};

/// One GPT partition of type "Linux filesystem" spanning the whole disk.
const WHOLE_DISK_SCRIPT: &str = "label: gpt\n\
     type=L\n";

pub struct SfdiskPartitions {
    executor: CommandExecutor,
}

impl SfdiskPartitions {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    fn settle(&self) -> Result<()> {
        self.executor.run(Command::new("udevadm").arg("settle"))
    }
}

impl PartitionService for SfdiskPartitions {
    fn list_disks(&self) -> Result<Vec<DiskInfo>> {
        let json = query(
            "lsblk",
            &["-J", "-b", "-o", "NAME,PATH,SIZE,TYPE,MOUNTPOINT"],
        )?;
        parse_lsblk(&json)
    }

    fn create_whole_disk_partition(&self, disk: &str) -> Result<String> {
        self.executor
            .run_with_input(Command::new("sfdisk").arg(disk), WHOLE_DISK_SCRIPT)?;
        if !self.executor.dry_run {
            self.settle()?;
        }
        Ok(get_part_path(disk, 1))
    }

    fn grow_partition_to_full(&self, disk: &str, number: u32) -> Result<GrowOutcome> {
        let Some(output) = self
            .executor
            .run_with_output(Command::new("growpart").arg(disk).arg(number.to_string()))?
        else {
            return Ok(GrowOutcome::Grown);
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        interpret_growpart(output.status.success(), &stdout, &stderr)
    }

    fn rescan(&self, disk: &str) -> Result<()> {
        let name = disk.strip_prefix("/dev/").unwrap_or(disk);
        let rescan = format!("/sys/class/block/{name}/device/rescan");
        if !std::path::Path::new(&rescan).exists() {
            // Not a SCSI-style device; the size is already current.
            tracing::debug!("{rescan} does not exist, skipping rescan");
            return Ok(());
        }
        if self.executor.dry_run {
            crate::ui::info(format!("[DRY RUN] echo 1 > {rescan}"));
            return Ok(());
        }
        std::fs::write(&rescan, "1").with_context(|| format!("writing {rescan}"))?;
        self.settle()
    }

    fn reread_partition_table(&self, disk: &str) -> Result<()> {
        self.executor.run(Command::new("partprobe").arg(disk))?;
        self.settle()
    }
}

/// growpart exits 1 and prints NOCHANGE when the partition already spans
/// the disk; that is not a failure.
fn interpret_growpart(success: bool, stdout: &str, stderr: &str) -> Result<GrowOutcome> {
    if success {
        return Ok(GrowOutcome::Grown);
    }
    if stdout.contains("NOCHANGE") || stderr.contains("NOCHANGE") {
        return Ok(GrowOutcome::Unchanged);
    }
    anyhow::bail!("growpart failed: {}", stderr.trim())
}

pub fn get_part_path(disk: &str, part_num: u32) -> String {
    if disk.chars().last().unwrap_or(' ').is_numeric() {
        format!("{}p{}", disk, part_num)
    } else {
        format!("{}{}", disk, part_num)
    }
}

pub fn parse_partition_number(disk_path: &str, partition_path: &str) -> Result<u32> {
    let disk_name = disk_path.strip_prefix("/dev/").unwrap_or(disk_path);
    let part_name = partition_path
        .strip_prefix("/dev/")
        .unwrap_or(partition_path);

    let suffix = part_name.strip_prefix(disk_name).with_context(|| {
        format!("Partition {partition_path} does not belong to disk {disk_path}")
    })?;
    let suffix = suffix.strip_prefix('p').unwrap_or(suffix);
    suffix
        .parse::<u32>()
        .with_context(|| format!("Failed to parse partition number of {partition_path}"))
}

/// lsblk prints sizes as numbers in newer releases and strings in older ones.
fn size_of(value: &Value) -> u64 {
    match value.get("size") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn has_mount(value: &Value) -> bool {
    let mounted_here = value
        .get("mountpoint")
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.is_empty());
    mounted_here || children(value).iter().any(has_mount)
}

fn children(value: &Value) -> Vec<Value> {
    value
        .get("children")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

pub fn parse_lsblk(json: &str) -> Result<Vec<DiskInfo>> {
    let root: Value = serde_json::from_str(json).context("parsing lsblk output")?;
    let devices = root
        .get("blockdevices")
        .and_then(|v| v.as_array())
        .context("lsblk output has no blockdevices")?;

    let mut disks = Vec::new();
    for device in devices {
        if device.get("type").and_then(|v| v.as_str()) != Some("disk") {
            continue;
        }
        let Some(name) = device.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let path = device
            .get("path")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("/dev/{name}"));

        let mut partitions = Vec::new();
        // Anything stacked straight on the disk (LVM, crypt) means it is in use.
        let mut in_use = false;
        for child in children(device) {
            if child.get("type").and_then(|v| v.as_str()) != Some("part") {
                in_use = true;
                continue;
            }
            let Some(child_name) = child.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let part_path = child
                .get("path")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("/dev/{child_name}"));
            let number = match parse_partition_number(&path, &part_path) {
                Ok(number) => number,
                Err(err) => {
                    tracing::debug!("ignoring {part_path}: {err:#}");
                    continue;
                }
            };
            partitions.push(PartitionInfo {
                number,
                path: part_path,
                size_bytes: size_of(&child),
            });
        }
        partitions.sort_by_key(|p| p.number);

        disks.push(DiskInfo {
            name: name.to_string(),
            path,
            size_bytes: size_of(device),
            partitions,
            mounted: in_use || has_mount(device),
        });
    }

    Ok(disks)
}
