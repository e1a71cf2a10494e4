//! Read-through queries against the live storage stack.
//!
//! Nothing here is cached: every call asks the tools again, so a decision
//! taken after a stage has run sees the topology that stage produced.

use anyhow::Result;

use super::types::{LogicalVolume, MountTarget, StorageTarget, VolumeGroupId};
use crate::error::ExtendError;
use crate::services::{FilesystemService, VolumeManagerService};
use crate::units::Capacity;

#[derive(Clone, Copy)]
pub struct TopologyInspector<'a> {
    volumes: &'a dyn VolumeManagerService,
    filesystems: &'a dyn FilesystemService,
}

impl<'a> TopologyInspector<'a> {
    pub fn new(volumes: &'a dyn VolumeManagerService, filesystems: &'a dyn FilesystemService) -> Self {
        Self {
            volumes,
            filesystems,
        }
    }

    /// Bind a mount point to the logical volume behind it.
    ///
    /// Fails with [`ExtendError::NotFound`] when nothing is mounted there or
    /// the mounted device is not a logical volume.
    pub fn resolve_target(&self, target: MountTarget, mount_point: &str) -> Result<StorageTarget> {
        let source = self
            .filesystems
            .mount_source(mount_point)?
            .ok_or_else(|| ExtendError::NotFound(format!("nothing is mounted at {mount_point}")))?;

        let logical_volume = self.volumes.logical_volume(&source)?.ok_or_else(|| {
            ExtendError::NotFound(format!(
                "{mount_point} is backed by {source}, which is not an LVM logical volume"
            ))
        })?;

        tracing::debug!(
            "{} -> {} in {}",
            mount_point,
            logical_volume.path,
            logical_volume.group
        );

        Ok(StorageTarget {
            target,
            mount_point: mount_point.to_string(),
            logical_volume,
        })
    }

    /// Like [`Self::resolve_target`], but a missing mount is `None` rather
    /// than an error.
    pub fn try_resolve_target(
        &self,
        target: MountTarget,
        mount_point: &str,
    ) -> Result<Option<StorageTarget>> {
        match self.resolve_target(target, mount_point) {
            Ok(resolved) => Ok(Some(resolved)),
            Err(err) if matches!(err.downcast_ref::<ExtendError>(), Some(ExtendError::NotFound(_))) => {
                tracing::debug!("{mount_point} not resolvable: {err:#}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn volume_group_of(&self, volume: &LogicalVolume) -> Result<Option<VolumeGroupId>> {
        Ok(self
            .volumes
            .logical_volume(&volume.path)?
            .map(|lv| lv.group))
    }

    /// `None` while the device has not joined any group yet.
    pub fn volume_group_of_physical_volume(&self, device: &str) -> Result<Option<VolumeGroupId>> {
        self.volumes.group_of_physical_volume(device)
    }

    pub fn free_capacity(&self, group: &VolumeGroupId) -> Result<Capacity> {
        self.volumes
            .free_capacity(group)?
            .ok_or_else(|| ExtendError::NotFound(format!("volume group {group}")).into())
    }
}
