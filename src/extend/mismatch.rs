//! Narrowing target choices when root and secondary live in different
//! volume groups.
//!
//! A choice is only ever offered when its group equals the group the disk
//! under modification reaches. Offering anything else would direct a
//! resize into the wrong pool.

use super::types::{MountTarget, VolumeGroupId};

/// Which group the device under modification can feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachable {
    /// The partition's physical volume already belongs to this group.
    Group(VolumeGroupId),
    /// A new disk that has not joined any group; it can join whichever
    /// target's group the user picks.
    Unjoined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchChoice {
    Extend(MountTarget),
    ReturnToMenu,
}

/// Groups currently backing the two mount points; `None` when a mount point
/// is not resolvable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetGroups {
    pub root: Option<VolumeGroupId>,
    pub secondary: Option<VolumeGroupId>,
}

impl TargetGroups {
    pub fn get(&self, target: MountTarget) -> Option<&VolumeGroupId> {
        match target {
            MountTarget::Root => self.root.as_ref(),
            MountTarget::Secondary => self.secondary.as_ref(),
        }
    }

    /// Both mount points resolve, to different groups.
    pub fn differ(&self) -> bool {
        matches!((&self.root, &self.secondary), (Some(a), Some(b)) if a != b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub choices: Vec<MismatchChoice>,
    /// The reachable group matches neither target.
    pub inconsistent: bool,
}

impl Resolution {
    pub fn targets(&self) -> Vec<MountTarget> {
        self.choices
            .iter()
            .filter_map(|choice| match choice {
                MismatchChoice::Extend(target) => Some(*target),
                MismatchChoice::ReturnToMenu => None,
            })
            .collect()
    }
}

pub fn resolve(groups: &TargetGroups, reachable: &Reachable) -> Resolution {
    let mut choices: Vec<MismatchChoice> = MountTarget::ALL
        .into_iter()
        .filter(|target| match (groups.get(*target), reachable) {
            (Some(group), Reachable::Group(wanted)) => group == wanted,
            (Some(_), Reachable::Unjoined) => true,
            (None, _) => false,
        })
        .map(MismatchChoice::Extend)
        .collect();

    let inconsistent = choices.is_empty();
    choices.push(MismatchChoice::ReturnToMenu);

    Resolution {
        choices,
        inconsistent,
    }
}
