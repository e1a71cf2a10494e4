//! States and legal transitions of an extension session.

use super::mismatch::{Reachable, Resolution};
use super::report::UsageReport;
use super::types::{DiskInfo, EncryptedDevice, MountTarget, StorageTarget, VolumeGroupId};
use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    NewDiskSingle,
    ExistingDiskSingle,
    NewDiskSplit,
    ExistingDiskSplit,
}

impl Workflow {
    pub const ALL: [Workflow; 4] = [
        Workflow::NewDiskSingle,
        Workflow::ExistingDiskSingle,
        Workflow::NewDiskSplit,
        Workflow::ExistingDiskSplit,
    ];

    pub fn label(self, settings: &Settings) -> String {
        match self {
            Workflow::NewDiskSingle => "Add a new disk and extend one filesystem".to_string(),
            Workflow::ExistingDiskSingle => {
                "Use space from an enlarged disk to extend one filesystem".to_string()
            }
            Workflow::NewDiskSplit => format!(
                "Add a new disk and split it between {} and {}",
                settings.root_mount, settings.secondary_mount
            ),
            Workflow::ExistingDiskSplit => format!(
                "Use space from an enlarged disk and split it between {} and {}",
                settings.root_mount, settings.secondary_mount
            ),
        }
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The user declined the confirmation gate; nothing was changed.
    Cancelled,
    /// The user left from the main menu.
    Exited,
}

/// Where the new capacity comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    NewDisk(DiskInfo),
    ExistingPartition {
        disk: DiskInfo,
        device: EncryptedDevice,
        group: VolumeGroupId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Single(StorageTarget),
    Split {
        root: StorageTarget,
        secondary: StorageTarget,
    },
}

impl Targets {
    pub fn all(&self) -> Vec<&StorageTarget> {
        match self {
            Targets::Single(target) => vec![target],
            Targets::Split { root, secondary } => vec![root, secondary],
        }
    }

    /// Group receiving the capacity. Split targets share one group.
    pub fn group(&self) -> &VolumeGroupId {
        match self {
            Targets::Single(target) => target.group(),
            Targets::Split { root, .. } => root.group(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub source: Source,
    pub targets: Targets,
}

impl Plan {
    pub fn mount_points(&self) -> Vec<String> {
        self.targets
            .all()
            .into_iter()
            .map(|t| t.mount_point.clone())
            .collect()
    }
}

/// Root and secondary disagree with each other or with the modified device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub source: Source,
    pub root: Option<StorageTarget>,
    pub secondary: Option<StorageTarget>,
    pub reachable: Reachable,
    pub resolution: Resolution,
}

impl Mismatch {
    pub fn take(self, target: MountTarget) -> (Source, Option<StorageTarget>) {
        match target {
            MountTarget::Root => (self.source, self.root),
            MountTarget::Secondary => (self.source, self.secondary),
        }
    }
}

#[derive(Debug)]
pub enum State {
    MenuIdle,
    WorkflowSelected(Workflow),
    TopologyResolved(Box<Plan>),
    MismatchHandling(Box<Mismatch>),
    PlanConfirmed(Box<Plan>),
    Executing(Box<Plan>, UsageReport),
    Reported(UsageReport),
    Finished(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    MenuIdle,
    WorkflowSelected,
    TopologyResolved,
    MismatchHandling,
    PlanConfirmed,
    Executing,
    Reported,
    Finished,
}

impl State {
    pub fn kind(&self) -> StateKind {
        match self {
            State::MenuIdle => StateKind::MenuIdle,
            State::WorkflowSelected(_) => StateKind::WorkflowSelected,
            State::TopologyResolved(_) => StateKind::TopologyResolved,
            State::MismatchHandling(_) => StateKind::MismatchHandling,
            State::PlanConfirmed(_) => StateKind::PlanConfirmed,
            State::Executing(..) => StateKind::Executing,
            State::Reported(_) => StateKind::Reported,
            State::Finished(_) => StateKind::Finished,
        }
    }
}

/// Every legal non-error transition. Errors leave the machine from any
/// state straight to the failure report.
pub const TRANSITIONS: &[(StateKind, StateKind)] = &[
    (StateKind::MenuIdle, StateKind::WorkflowSelected),
    (StateKind::MenuIdle, StateKind::Finished),
    (StateKind::WorkflowSelected, StateKind::TopologyResolved),
    (StateKind::WorkflowSelected, StateKind::MismatchHandling),
    (StateKind::MismatchHandling, StateKind::TopologyResolved),
    (StateKind::MismatchHandling, StateKind::MenuIdle),
    (StateKind::TopologyResolved, StateKind::PlanConfirmed),
    (StateKind::TopologyResolved, StateKind::Finished),
    (StateKind::PlanConfirmed, StateKind::Executing),
    (StateKind::Executing, StateKind::Reported),
    (StateKind::Reported, StateKind::Finished),
];

pub fn is_allowed(from: StateKind, to: StateKind) -> bool {
    TRANSITIONS.contains(&(from, to))
}
