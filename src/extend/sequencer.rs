//! The five-stage resize pipeline.
//!
//! partition -> encryption container -> physical volume -> logical volume
//! -> filesystem. Stages run strictly in that order and the first failure
//! ends the sequence; earlier stages are never rolled back.

use std::time::Duration;

use anyhow::Result;

use super::types::{EncryptedDevice, FsType, LogicalVolume, Stage, StorageTarget};
use crate::error::ExtendError;
use crate::services::{GrowOutcome, Services};
use crate::ui;
use crate::units::Capacity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LvGrowth {
    /// Take every free extent left in the group.
    AllFree,
    Exactly(Capacity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
    GrowPartition { disk: String, number: u32 },
    GrowContainer { container_name: String },
    GrowPhysicalVolume { device: String },
    GrowLogicalVolume { volume: LogicalVolume, growth: LvGrowth },
    GrowFilesystem { mount_point: String, device: String },
}

impl StageAction {
    pub fn stage(&self) -> Stage {
        match self {
            StageAction::GrowPartition { .. } => Stage::Partition,
            StageAction::GrowContainer { .. } => Stage::Container,
            StageAction::GrowPhysicalVolume { .. } => Stage::PhysicalVolume,
            StageAction::GrowLogicalVolume { .. } => Stage::LogicalVolume,
            StageAction::GrowFilesystem { .. } => Stage::Filesystem,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagePlan {
    Run(StageAction),
    Skip(String),
}

/// Five stage slots for one target (or for the shared pool), always held
/// in [`Stage::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeSequence {
    label: String,
    stages: [StagePlan; 5],
}

impl ResizeSequence {
    /// A sequence with every stage skipped; fill slots with [`Self::with`].
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stages: std::array::from_fn(|_| StagePlan::Skip("not part of this run".to_string())),
        }
    }

    pub fn with(mut self, action: StageAction) -> Self {
        let slot = action.stage().index();
        self.stages[slot] = StagePlan::Run(action);
        self
    }

    pub fn skipping(mut self, stage: Stage, reason: impl Into<String>) -> Self {
        self.stages[stage.index()] = StagePlan::Skip(reason.into());
        self
    }

    /// Stages 1-3: grow the partition, its container and the physical volume.
    pub fn pool(device: &EncryptedDevice) -> Self {
        Self::new(format!("{} pool", device.partition))
            .with(StageAction::GrowPartition {
                disk: device.disk.clone(),
                number: device.partition_number,
            })
            .with(StageAction::GrowContainer {
                container_name: device.container_name.clone(),
            })
            .with(StageAction::GrowPhysicalVolume {
                device: device.physical_volume(),
            })
            .skipping(Stage::LogicalVolume, "allocated per target later")
            .skipping(Stage::Filesystem, "allocated per target later")
    }

    /// Stages 4-5 for one target, with the pool stages marked as done.
    pub fn target(target: &StorageTarget, growth: LvGrowth, pool_reason: &str) -> Self {
        Self::new(target.mount_point.clone())
            .skipping(Stage::Partition, pool_reason)
            .skipping(Stage::Container, pool_reason)
            .skipping(Stage::PhysicalVolume, pool_reason)
            .with(StageAction::GrowLogicalVolume {
                volume: target.logical_volume.clone(),
                growth,
            })
            .with(StageAction::GrowFilesystem {
                mount_point: target.mount_point.clone(),
                device: target.logical_volume.path.clone(),
            })
    }

    /// All five stages for one target on an enlarged partition.
    pub fn full(device: &EncryptedDevice, target: &StorageTarget, growth: LvGrowth) -> Self {
        let pool = Self::pool(device);
        let mut sequence = Self::target(target, growth, "");
        sequence.stages[..3].clone_from_slice(&pool.stages[..3]);
        sequence
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stages(&self) -> impl Iterator<Item = (Stage, &StagePlan)> {
        Stage::ALL.into_iter().zip(self.stages.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceReport {
    pub executed: Vec<Stage>,
    pub skipped: Vec<Stage>,
}

pub struct ResizeSequencer<'a> {
    services: Services<'a>,
    settle_delay: Duration,
}

impl<'a> ResizeSequencer<'a> {
    pub fn new(services: Services<'a>, settle_delay: Duration) -> Self {
        Self {
            services,
            settle_delay,
        }
    }

    pub fn run(&self, sequence: &ResizeSequence) -> Result<SequenceReport, ExtendError> {
        let mut report = SequenceReport::default();

        for (stage, plan) in sequence.stages() {
            match plan {
                StagePlan::Skip(reason) => {
                    tracing::debug!("[{}] skipping {}: {}", sequence.label(), stage, reason);
                    report.skipped.push(stage);
                }
                StagePlan::Run(action) => {
                    ui::step(format!("[{}] Growing {}", sequence.label(), stage));
                    self.execute(action)?;
                    report.executed.push(stage);
                }
            }
        }

        Ok(report)
    }

    fn execute(&self, action: &StageAction) -> Result<(), ExtendError> {
        let stage = action.stage();
        match action {
            StageAction::GrowPartition { disk, number } => {
                let outcome = self
                    .services
                    .partitions
                    .grow_partition_to_full(disk, *number)
                    .map_err(|e| ExtendError::stage(stage, e))?;
                if outcome == GrowOutcome::Unchanged {
                    ui::info(format!(
                        "Partition {number} on {disk} already fills the disk"
                    ));
                }
                // The container stage would otherwise see the old geometry.
                self.services
                    .partitions
                    .reread_partition_table(disk)
                    .map_err(|e| ExtendError::stage(stage, e))?;
                self.settle();
            }
            StageAction::GrowContainer { container_name } => {
                self.services
                    .encryption
                    .grow_container(container_name)
                    .map_err(|e| ExtendError::stage(stage, e))?;
            }
            StageAction::GrowPhysicalVolume { device } => {
                self.services
                    .volumes
                    .grow_physical_volume(device)
                    .map_err(|e| ExtendError::stage(stage, e))?;
            }
            StageAction::GrowLogicalVolume { volume, growth } => {
                let result = match growth {
                    LvGrowth::AllFree => self.services.volumes.grow_logical_volume_full(volume),
                    LvGrowth::Exactly(amount) => {
                        self.services.volumes.grow_logical_volume_by(volume, *amount)
                    }
                };
                result.map_err(|e| ExtendError::stage(stage, e))?;
            }
            StageAction::GrowFilesystem {
                mount_point,
                device,
            } => {
                let reported = self
                    .services
                    .filesystems
                    .detect_type(mount_point)
                    .map_err(|e| ExtendError::stage(stage, e))?;
                let fs = FsType::from_reported(&reported)?;
                self.services
                    .filesystems
                    .grow(&fs, mount_point, device)
                    .map_err(|e| ExtendError::stage(stage, e))?;
            }
        }
        Ok(())
    }

    /// Give udev time to re-create device nodes after a table change.
    pub fn settle(&self) {
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
    }
}
