use anyhow::Result;
use std::process::Command;

use super::{CommandExecutor, probe, query};
use crate::extend::types::{FsType, Usage};
use crate::services::FilesystemService;

pub struct HostFilesystems {
    executor: CommandExecutor,
}

impl HostFilesystems {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

impl FilesystemService for HostFilesystems {
    fn mount_source(&self, mount_point: &str) -> Result<Option<String>> {
        let output = probe("findmnt", &["-n", "-o", "SOURCE", "--mountpoint", mount_point])?;
        Ok(output
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    fn detect_type(&self, mount_point: &str) -> Result<String> {
        let fstype = query("findmnt", &["-n", "-o", "FSTYPE", "--mountpoint", mount_point])?;
        Ok(fstype.trim().to_string())
    }

    fn grow(&self, fs: &FsType, mount_point: &str, device: &str) -> Result<()> {
        match fs {
            FsType::Ext(_) => self.executor.run(Command::new("resize2fs").arg(device)),
            // xfs only grows while mounted and is addressed by mount point.
            FsType::Xfs => self.executor.run(Command::new("xfs_growfs").arg(mount_point)),
        }
    }

    fn usage(&self, mount_point: &str) -> Result<Option<Usage>> {
        let output = probe("df", &["-B1", "--output=size,used,avail", mount_point])?;
        Ok(output.as_deref().and_then(parse_df))
    }
}

fn parse_df(output: &str) -> Option<Usage> {
    let row = output.lines().nth(1)?;
    let mut cols = row.split_whitespace().map(|c| c.parse::<u64>());
    Some(Usage {
        size: cols.next()?.ok()?,
        used: cols.next()?.ok()?,
        available: cols.next()?.ok()?,
    })
}
