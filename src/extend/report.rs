use anyhow::Result;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use super::types::Usage;
use crate::services::FilesystemService;
use crate::units::{format_bytes, format_delta};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountUsage {
    pub mount_point: String,
    pub before: Option<Usage>,
    pub after: Option<Usage>,
}

/// Before/after filesystem sizes for every mount point a run touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageReport {
    pub mounts: Vec<MountUsage>,
    /// A new disk was added, so boot configuration changed.
    pub boot_changed: bool,
}

impl UsageReport {
    pub fn capture_before(filesystems: &dyn FilesystemService, mount_points: &[String]) -> Result<Self> {
        let mut mounts = Vec::with_capacity(mount_points.len());
        for mount_point in mount_points {
            mounts.push(MountUsage {
                mount_point: mount_point.clone(),
                before: filesystems.usage(mount_point)?,
                after: None,
            });
        }
        Ok(Self {
            mounts,
            boot_changed: false,
        })
    }

    pub fn capture_after(&mut self, filesystems: &dyn FilesystemService) -> Result<()> {
        for mount in &mut self.mounts {
            mount.after = filesystems.usage(&mount.mount_point)?;
        }
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                "Mount point",
                "Size before",
                "Size after",
                "Available before",
                "Available after",
                "Growth",
            ]);

        for mount in &self.mounts {
            let size = |u: Option<Usage>| u.map(|u| format_bytes(u.size)).unwrap_or_else(|| "-".into());
            let avail =
                |u: Option<Usage>| u.map(|u| format_bytes(u.available)).unwrap_or_else(|| "-".into());
            let growth = match (mount.before, mount.after) {
                (Some(before), Some(after)) => format_delta(before.size, after.size),
                _ => "-".to_string(),
            };
            table.add_row(vec![
                Cell::new(&mount.mount_point),
                Cell::new(size(mount.before)),
                Cell::new(size(mount.after)),
                Cell::new(avail(mount.before)),
                Cell::new(avail(mount.after)),
                Cell::new(growth),
            ]);
        }

        table.to_string()
    }
}
