use std::fmt;

use crate::config::Settings;
use crate::error::ExtendError;

/// One of the two well-known mount points an extension can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountTarget {
    Root,
    Secondary,
}

impl MountTarget {
    pub const ALL: [MountTarget; 2] = [MountTarget::Root, MountTarget::Secondary];

    pub fn mount_point(self, settings: &Settings) -> &str {
        match self {
            MountTarget::Root => &settings.root_mount,
            MountTarget::Secondary => &settings.secondary_mount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeGroupId(pub String);

impl fmt::Display for VolumeGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    pub group: VolumeGroupId,
    pub name: String,
    /// Device path, e.g. `/dev/vg0/root`
    pub path: String,
}

/// A mount point bound to the logical volume and volume group behind it.
/// Resolved fresh for every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTarget {
    pub target: MountTarget,
    pub mount_point: String,
    pub logical_volume: LogicalVolume,
}

impl StorageTarget {
    pub fn group(&self) -> &VolumeGroupId {
        &self.logical_volume.group
    }
}

/// A LUKS partition and the physical volume exposed through its container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedDevice {
    pub disk: String,
    pub partition_number: u32,
    pub partition: String,
    pub container_name: String,
    pub uuid: Option<String>,
}

impl EncryptedDevice {
    /// Physical volume device, i.e. the opened container.
    pub fn physical_volume(&self) -> String {
        format!("/dev/mapper/{}", self.container_name)
    }
}

/// The mapper name given to a freshly opened container.
pub fn container_name_for(prefix: &str, uuid: &str) -> String {
    format!("{prefix}{uuid}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub number: u32,
    pub path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub partitions: Vec<PartitionInfo>,
    pub mounted: bool,
}

impl DiskInfo {
    pub fn partition(&self, number: u32) -> Option<&PartitionInfo> {
        self.partitions.iter().find(|p| p.number == number)
    }

    pub fn is_blank(&self) -> bool {
        self.partitions.is_empty() && !self.mounted
    }
}

/// Filesystem families that can be grown online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsType {
    Ext(String),
    Xfs,
}

impl FsType {
    pub fn from_reported(reported: &str) -> Result<Self, ExtendError> {
        match reported.trim() {
            fs @ ("ext2" | "ext3" | "ext4") => Ok(FsType::Ext(fs.to_string())),
            "xfs" => Ok(FsType::Xfs),
            other => Err(ExtendError::UnsupportedFilesystem(other.to_string())),
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsType::Ext(name) => f.write_str(name),
            FsType::Xfs => f.write_str("xfs"),
        }
    }
}

/// The five resize stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Partition,
    Container,
    PhysicalVolume,
    LogicalVolume,
    Filesystem,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Partition,
        Stage::Container,
        Stage::PhysicalVolume,
        Stage::LogicalVolume,
        Stage::Filesystem,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Partition => "partition",
            Stage::Container => "encryption container",
            Stage::PhysicalVolume => "physical volume",
            Stage::LogicalVolume => "logical volume",
            Stage::Filesystem => "filesystem",
        };
        f.write_str(name)
    }
}

/// Filesystem usage as reported by `df`, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub size: u64,
    pub used: u64,
    pub available: u64,
}
