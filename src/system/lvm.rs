use anyhow::Result;
use std::process::Command;

use super::{CommandExecutor, probe};
use crate::extend::types::{LogicalVolume, VolumeGroupId};
use crate::services::VolumeManagerService;
use crate::units::Capacity;

pub struct LvmTools {
    executor: CommandExecutor,
}

impl LvmTools {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

fn parse_tabbed_line(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|part| part.trim().to_string())
        .collect()
}

fn first_row(output: &str) -> Option<Vec<String>> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(parse_tabbed_line)
}

/// `lvs -o vg_name,lv_name,lv_path`
fn parse_lv_row(output: &str) -> Option<LogicalVolume> {
    let cols = first_row(output)?;
    if cols.len() < 3 || cols[0].is_empty() {
        return None;
    }
    Some(LogicalVolume {
        group: VolumeGroupId(cols[0].clone()),
        name: cols[1].clone(),
        path: cols[2].clone(),
    })
}

/// `pvs -o pv_name,vg_name`; an orphan PV has an empty group column.
fn parse_pv_group(output: &str) -> Option<VolumeGroupId> {
    let cols = first_row(output)?;
    cols.get(1)
        .filter(|vg| !vg.is_empty())
        .map(|vg| VolumeGroupId(vg.clone()))
}

/// `vgs --units b --nosuffix -o vg_free`
fn parse_vg_free(output: &str) -> Option<Capacity> {
    let cols = first_row(output)?;
    let bytes: u64 = cols.first()?.parse().ok()?;
    Some(Capacity::from_bytes(bytes))
}

impl VolumeManagerService for LvmTools {
    fn init_physical_volume(&self, device: &str) -> Result<()> {
        self.executor.run(Command::new("pvcreate").arg(device))
    }

    fn join_group(&self, group: &VolumeGroupId, device: &str) -> Result<()> {
        self.executor
            .run(Command::new("vgextend").arg(&group.0).arg(device))
    }

    fn grow_physical_volume(&self, device: &str) -> Result<()> {
        self.executor.run(Command::new("pvresize").arg(device))
    }

    fn grow_logical_volume_full(&self, volume: &LogicalVolume) -> Result<()> {
        self.executor
            .run(Command::new("lvextend").args(["-l", "+100%FREE"]).arg(&volume.path))
    }

    fn grow_logical_volume_by(&self, volume: &LogicalVolume, amount: Capacity) -> Result<()> {
        self.executor.run(
            Command::new("lvextend")
                .arg("-L")
                .arg(amount.lvm_size_arg())
                .arg(&volume.path),
        )
    }

    fn free_capacity(&self, group: &VolumeGroupId) -> Result<Option<Capacity>> {
        let output = probe(
            "vgs",
            &[
                "--noheadings",
                "--units",
                "b",
                "--nosuffix",
                "-o",
                "vg_free",
                "--separator",
                "\t",
                &group.0,
            ],
        )?;
        Ok(output.as_deref().and_then(parse_vg_free))
    }

    fn group_of_physical_volume(&self, device: &str) -> Result<Option<VolumeGroupId>> {
        let output = probe(
            "pvs",
            &["--noheadings", "-o", "pv_name,vg_name", "--separator", "\t", device],
        )?;
        Ok(output.as_deref().and_then(parse_pv_group))
    }

    fn logical_volume(&self, device: &str) -> Result<Option<LogicalVolume>> {
        let output = probe(
            "lvs",
            &[
                "--noheadings",
                "-o",
                "vg_name,lv_name,lv_path",
                "--separator",
                "\t",
                device,
            ],
        )?;
        Ok(output.as_deref().and_then(parse_lv_row))
    }
}
