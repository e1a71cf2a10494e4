//! Narrow contracts for the external storage tools.
//!
//! The extension core only ever talks to these traits; `crate::system`
//! binds them to sfdisk, cryptsetup, LVM and friends, and tests bind them
//! to in-memory fakes.

use anyhow::Result;

use crate::extend::types::{DiskInfo, FsType, LogicalVolume, Usage, VolumeGroupId};
use crate::units::Capacity;

/// Result of asking a partition to grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowOutcome {
    Grown,
    /// The partition already spans all available space.
    Unchanged,
}

pub trait PartitionService {
    fn list_disks(&self) -> Result<Vec<DiskInfo>>;

    /// Look a disk up by name (`sdb`) or path (`/dev/sdb`).
    fn disk_info(&self, disk: &str) -> Result<Option<DiskInfo>> {
        let wanted = disk.trim().strip_prefix("/dev/").unwrap_or(disk.trim());
        Ok(self.list_disks()?.into_iter().find(|d| d.name == wanted))
    }

    /// Lay a fresh partition table with one partition spanning the disk.
    /// Returns the partition device path.
    fn create_whole_disk_partition(&self, disk: &str) -> Result<String>;

    fn grow_partition_to_full(&self, disk: &str, number: u32) -> Result<GrowOutcome>;

    /// Ask the kernel to re-read the disk's size after an out-of-band resize.
    fn rescan(&self, disk: &str) -> Result<()>;

    fn reread_partition_table(&self, disk: &str) -> Result<()>;
}

pub trait EncryptionService {
    /// Initialise LUKS on the partition. Passphrase entry happens here.
    fn format(&self, partition: &str) -> Result<()>;

    fn container_uuid(&self, partition: &str) -> Result<String>;

    fn open(&self, partition: &str, container_name: &str) -> Result<()>;

    fn grow_container(&self, container_name: &str) -> Result<()>;

    /// Mapper name of the opened container on this partition, if any.
    fn open_container_of(&self, partition: &str) -> Result<Option<String>>;
}

pub trait VolumeManagerService {
    fn init_physical_volume(&self, device: &str) -> Result<()>;

    fn join_group(&self, group: &VolumeGroupId, device: &str) -> Result<()>;

    fn grow_physical_volume(&self, device: &str) -> Result<()>;

    fn grow_logical_volume_full(&self, volume: &LogicalVolume) -> Result<()>;

    fn grow_logical_volume_by(&self, volume: &LogicalVolume, amount: Capacity) -> Result<()>;

    /// `None` when the group does not exist.
    fn free_capacity(&self, group: &VolumeGroupId) -> Result<Option<Capacity>>;

    /// `None` when the device is not a physical volume in any group.
    fn group_of_physical_volume(&self, device: &str) -> Result<Option<VolumeGroupId>>;

    /// `None` when the device is not a logical volume.
    fn logical_volume(&self, device: &str) -> Result<Option<LogicalVolume>>;
}

pub trait FilesystemService {
    /// Source device of the filesystem mounted exactly at `mount_point`.
    fn mount_source(&self, mount_point: &str) -> Result<Option<String>>;

    fn detect_type(&self, mount_point: &str) -> Result<String>;

    fn grow(&self, fs: &FsType, mount_point: &str, device: &str) -> Result<()>;

    fn usage(&self, mount_point: &str) -> Result<Option<Usage>>;
}

pub trait BootConfigService {
    fn register_encrypted_device(&self, container_name: &str, uuid: &str) -> Result<()>;

    fn append_boot_parameter(&self, uuid: &str) -> Result<()>;

    fn rebuild_bootloader_config(&self) -> Result<()>;

    fn rebuild_boot_image(&self) -> Result<()>;
}

/// Borrowed bundle of every collaborator the orchestrator needs.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub partitions: &'a dyn PartitionService,
    pub encryption: &'a dyn EncryptionService,
    pub volumes: &'a dyn VolumeManagerService,
    pub filesystems: &'a dyn FilesystemService,
    pub boot: &'a dyn BootConfigService,
}
