//! The interactive extension session.
//!
//! [`Orchestrator::run`] drives the state machine in [`super::state`]:
//! menu -> discovery -> (mismatch handling) -> confirmation -> execution ->
//! report. Any error leaves the machine immediately; `main` turns it into
//! the failure report and a non-zero exit.

use std::time::Duration;

use anyhow::{Result, bail};

use super::mismatch::{self, MismatchChoice, Reachable, TargetGroups};
use super::planner;
use super::prompt::Prompter;
use super::report::UsageReport;
use super::sequencer::{LvGrowth, ResizeSequence, ResizeSequencer};
use super::state::{Mismatch, Outcome, Plan, Source, State, Targets, Workflow, is_allowed};
use super::topology::TopologyInspector;
use super::types::{
    DiskInfo, EncryptedDevice, FsType, MountTarget, Stage, StorageTarget, VolumeGroupId,
    container_name_for,
};
use crate::config::Settings;
use crate::error::ExtendError;
use crate::services::Services;
use crate::ui;
use crate::units::format_bytes;

pub struct Orchestrator<'a> {
    services: Services<'a>,
    settings: &'a Settings,
    prompter: &'a mut dyn Prompter,
    sequencer: ResizeSequencer<'a>,
    dry_run: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        services: Services<'a>,
        settings: &'a Settings,
        prompter: &'a mut dyn Prompter,
        dry_run: bool,
    ) -> Self {
        let settle = if dry_run {
            Duration::ZERO
        } else {
            settings.settle_delay()
        };
        Self {
            services,
            settings,
            prompter,
            sequencer: ResizeSequencer::new(services, settle),
            dry_run,
        }
    }

    fn inspector(&self) -> TopologyInspector<'a> {
        TopologyInspector::new(self.services.volumes, self.services.filesystems)
    }

    pub fn run(&mut self) -> Result<Outcome> {
        let mut state = State::MenuIdle;
        loop {
            if let State::Finished(outcome) = state {
                return Ok(outcome);
            }
            let from = state.kind();
            let next = self.advance(state)?;
            let to = next.kind();
            if !is_allowed(from, to) {
                bail!("illegal state transition {from:?} -> {to:?}");
            }
            tracing::debug!("state {from:?} -> {to:?}");
            state = next;
        }
    }

    pub fn advance(&mut self, state: State) -> Result<State> {
        match state {
            State::MenuIdle => self.menu(),
            State::WorkflowSelected(workflow) => self.discover(workflow),
            State::MismatchHandling(mismatch) => self.handle_mismatch(*mismatch),
            State::TopologyResolved(plan) => self.confirm(*plan),
            State::PlanConfirmed(plan) => self.begin(*plan),
            State::Executing(plan, report) => self.execute(*plan, report),
            State::Reported(report) => self.report(report),
            State::Finished(outcome) => Ok(State::Finished(outcome)),
        }
    }

    fn menu(&mut self) -> Result<State> {
        let mut items: Vec<String> = Workflow::ALL
            .iter()
            .map(|w| w.label(self.settings))
            .collect();
        items.push("Exit".to_string());

        let index = self.prompter.select("What would you like to do?", &items)?;
        Ok(match Workflow::ALL.get(index) {
            Some(workflow) => State::WorkflowSelected(*workflow),
            None => State::Finished(Outcome::Exited),
        })
    }

    fn discover(&mut self, workflow: Workflow) -> Result<State> {
        ui::separator(false);
        ui::step(workflow.label(self.settings));

        match workflow {
            Workflow::NewDiskSingle => {
                // The disk joins exactly the chosen target's group, so there
                // is nothing for the other mount point to disagree with.
                let disk = self.ask_new_disk()?;
                let target = self.ask_target(
                    &MountTarget::ALL,
                    "Which filesystem should receive the new disk?",
                )?;
                let resolved = self
                    .inspector()
                    .resolve_target(target, target.mount_point(self.settings))?;
                Ok(State::TopologyResolved(Box::new(Plan {
                    source: Source::NewDisk(disk),
                    targets: Targets::Single(resolved),
                })))
            }
            Workflow::ExistingDiskSingle => {
                let source = self.ask_existing_partition()?;
                let reachable = source_group(&source)?;
                let root = self.try_resolve(MountTarget::Root)?;
                let secondary = self.try_resolve(MountTarget::Secondary)?;
                let groups = target_groups(root.as_ref(), secondary.as_ref());
                let reachable = Reachable::Group(reachable);
                let resolution = mismatch::resolve(&groups, &reachable);

                if groups.differ() || resolution.inconsistent {
                    return Ok(State::MismatchHandling(Box::new(Mismatch {
                        source,
                        root,
                        secondary,
                        reachable,
                        resolution,
                    })));
                }

                let target = self.ask_target(
                    &resolution.targets(),
                    "Which filesystem should receive the new space?",
                )?;
                let chosen = match target {
                    MountTarget::Root => root,
                    MountTarget::Secondary => secondary,
                }
                .ok_or_else(|| {
                    ExtendError::NotFound(format!(
                        "nothing is mounted at {}",
                        target.mount_point(self.settings)
                    ))
                })?;
                Ok(State::TopologyResolved(Box::new(Plan {
                    source,
                    targets: Targets::Single(chosen),
                })))
            }
            Workflow::NewDiskSplit => {
                let disk = self.ask_new_disk()?;
                let (root, secondary) = self.resolve_both()?;
                if root.group() != secondary.group() {
                    let groups = target_groups(Some(&root), Some(&secondary));
                    let reachable = Reachable::Unjoined;
                    let resolution = mismatch::resolve(&groups, &reachable);
                    return Ok(State::MismatchHandling(Box::new(Mismatch {
                        source: Source::NewDisk(disk),
                        root: Some(root),
                        secondary: Some(secondary),
                        reachable,
                        resolution,
                    })));
                }
                Ok(State::TopologyResolved(Box::new(Plan {
                    source: Source::NewDisk(disk),
                    targets: Targets::Split { root, secondary },
                })))
            }
            Workflow::ExistingDiskSplit => {
                let source = self.ask_existing_partition()?;
                let reachable = Reachable::Group(source_group(&source)?);
                let (root, secondary) = self.resolve_both()?;
                let groups = target_groups(Some(&root), Some(&secondary));
                let resolution = mismatch::resolve(&groups, &reachable);

                if groups.differ() || resolution.inconsistent {
                    return Ok(State::MismatchHandling(Box::new(Mismatch {
                        source,
                        root: Some(root),
                        secondary: Some(secondary),
                        reachable,
                        resolution,
                    })));
                }
                Ok(State::TopologyResolved(Box::new(Plan {
                    source,
                    targets: Targets::Split { root, secondary },
                })))
            }
        }
    }

    fn handle_mismatch(&mut self, mismatch: Mismatch) -> Result<State> {
        let describe = |target: &Option<StorageTarget>, mount: MountTarget| match target {
            Some(t) => format!("{} is in volume group {}", t.mount_point, t.group()),
            None => format!("{} is not an LVM mount", mount.mount_point(self.settings)),
        };
        ui::warn(format!(
            "{}, but {}.",
            describe(&mismatch.root, MountTarget::Root),
            describe(&mismatch.secondary, MountTarget::Secondary)
        ));

        match &mismatch.reachable {
            Reachable::Group(group) if mismatch.resolution.inconsistent => ui::warn(format!(
                "The modified device belongs to {group}, which backs neither filesystem. \
                 Nothing can be extended from it."
            )),
            Reachable::Group(group) => ui::warn(format!(
                "The modified device belongs to {group}; only filesystems in that group can grow."
            )),
            Reachable::Unjoined => ui::warn(
                "Both filesystems cannot share one new disk. Pick one filesystem to extend instead."
                    .to_string(),
            ),
        }

        let items: Vec<String> = mismatch
            .resolution
            .choices
            .iter()
            .map(|choice| match choice {
                MismatchChoice::Extend(target) => {
                    format!("Extend {} only", target.mount_point(self.settings))
                }
                MismatchChoice::ReturnToMenu => "Return to main menu".to_string(),
            })
            .collect();

        let index = self.prompter.select("How do you want to continue?", &items)?;
        let choice = mismatch.resolution.choices.get(index).copied();
        match choice {
            Some(MismatchChoice::Extend(target)) => {
                let (source, chosen) = mismatch.take(target);
                let chosen = chosen.ok_or_else(|| {
                    ExtendError::Topology(format!(
                        "{} is no longer resolvable",
                        target.mount_point(self.settings)
                    ))
                })?;
                Ok(State::TopologyResolved(Box::new(Plan {
                    source,
                    targets: Targets::Single(chosen),
                })))
            }
            _ => Ok(State::MenuIdle),
        }
    }

    fn confirm(&mut self, plan: Plan) -> Result<State> {
        self.preflight(&plan)?;
        self.print_summary(&plan);

        if self.prompter.confirm("Proceed with these changes?")? {
            Ok(State::PlanConfirmed(Box::new(plan)))
        } else {
            ui::info("Cancelled. No changes were made.");
            Ok(State::Finished(Outcome::Cancelled))
        }
    }

    fn begin(&mut self, plan: Plan) -> Result<State> {
        let report = UsageReport::capture_before(self.services.filesystems, &plan.mount_points())?;
        Ok(State::Executing(Box::new(plan), report))
    }

    fn execute(&mut self, plan: Plan, mut report: UsageReport) -> Result<State> {
        match (&plan.source, &plan.targets) {
            (Source::NewDisk(disk), targets) => {
                let group = targets.group().clone();
                let device = self.prepare_new_disk(disk, &group)?;
                let reason = "prepared on the new disk";
                match targets {
                    Targets::Single(target) => {
                        self.sequencer
                            .run(&ResizeSequence::target(target, LvGrowth::AllFree, reason))?;
                    }
                    Targets::Split { root, secondary } => {
                        self.split(&group, root, secondary, reason)?
                    }
                }
                self.update_boot_config(&device)?;
                report.boot_changed = true;
            }
            (Source::ExistingPartition { device, .. }, Targets::Single(target)) => {
                self.sequencer
                    .run(&ResizeSequence::full(device, target, LvGrowth::AllFree))?;
            }
            (Source::ExistingPartition { device, group, .. }, Targets::Split { root, secondary }) => {
                self.sequencer.run(&ResizeSequence::pool(device))?;
                self.split(group, root, secondary, "grown in the shared pool")?;
            }
        }

        report.capture_after(self.services.filesystems)?;
        Ok(State::Reported(report))
    }

    fn report(&mut self, report: UsageReport) -> Result<State> {
        ui::separator(false);
        ui::block(&report.render());
        if report.boot_changed {
            ui::warn(
                "Boot configuration changed. Reboot soon to confirm the new container unlocks at boot.",
            );
        }
        ui::success("Extension complete.");
        Ok(State::Finished(Outcome::Completed))
    }

    /// Ask how to split the group's free capacity, then grow root fully
    /// (including its filesystem) before secondary.
    fn split(
        &mut self,
        group: &VolumeGroupId,
        root: &StorageTarget,
        secondary: &StorageTarget,
        pool_reason: &str,
    ) -> Result<()> {
        let inspector = self.inspector();
        for target in [root, secondary] {
            if inspector.volume_group_of(&target.logical_volume)?.as_ref() != Some(group) {
                return Err(ExtendError::Topology(format!(
                    "{} is no longer in volume group {group}",
                    target.logical_volume.path
                ))
                .into());
            }
        }

        let total = inspector.free_capacity(group)?;
        ui::info(format!("Volume group {group} has {total} unallocated."));

        let answer = self.prompter.input(&format!(
            "How many GiB of {total} should go to {}? (the rest goes to {})",
            root.mount_point, secondary.mount_point
        ))?;
        let plan = planner::plan(total, &answer).map_err(ExtendError::from)?;
        ui::info(format!(
            "{}: +{}, {}: +{}",
            root.mount_point, plan.first, secondary.mount_point, plan.second
        ));

        let threshold = self.settings.negligible_capacity();
        if plan.first_is_negligible(threshold) {
            ui::info(format!("Nothing to allocate to {}, skipping it.", root.mount_point));
        } else {
            self.sequencer.run(&ResizeSequence::target(
                root,
                LvGrowth::Exactly(plan.first),
                pool_reason,
            ))?;
        }

        if plan.second_is_negligible(threshold) {
            ui::info(format!(
                "Nothing to allocate to {}, skipping it.",
                secondary.mount_point
            ));
        } else {
            // The remainder is whatever is left; taking all free extents
            // avoids extent rounding leaving a sliver or overshooting.
            self.sequencer.run(&ResizeSequence::target(
                secondary,
                LvGrowth::AllFree,
                pool_reason,
            ))?;
        }
        Ok(())
    }

    fn prepare_new_disk(&mut self, disk: &DiskInfo, group: &VolumeGroupId) -> Result<EncryptedDevice> {
        let partitions = self.services.partitions;
        let encryption = self.services.encryption;
        let volumes = self.services.volumes;

        ui::step(format!("Partitioning {}", disk.path));
        let partition = partitions
            .create_whole_disk_partition(&disk.path)
            .map_err(|e| ExtendError::stage(Stage::Partition, e))?;
        partitions
            .reread_partition_table(&disk.path)
            .map_err(|e| ExtendError::stage(Stage::Partition, e))?;
        self.sequencer.settle();

        ui::step(format!("Encrypting {partition}"));
        ui::info("You will be asked to choose a passphrase for the new container.");
        encryption
            .format(&partition)
            .map_err(|e| ExtendError::stage(Stage::Container, e))?;
        let uuid = encryption
            .container_uuid(&partition)
            .map_err(|e| ExtendError::stage(Stage::Container, e))?;
        let container_name = container_name_for(&self.settings.container_prefix, &uuid);
        ui::info("Enter the same passphrase again to open the container.");
        encryption
            .open(&partition, &container_name)
            .map_err(|e| ExtendError::stage(Stage::Container, e))?;

        let device = EncryptedDevice {
            disk: disk.path.clone(),
            partition_number: 1,
            partition,
            container_name,
            uuid: Some(uuid),
        };
        let pv = device.physical_volume();

        ui::step(format!("Adding {pv} to volume group {group}"));
        volumes
            .init_physical_volume(&pv)
            .map_err(|e| ExtendError::stage(Stage::PhysicalVolume, e))?;
        volumes
            .join_group(group, &pv)
            .map_err(|e| ExtendError::stage(Stage::PhysicalVolume, e))?;

        match self.inspector().volume_group_of_physical_volume(&pv)? {
            Some(joined) if &joined == group => {}
            Some(other) => {
                return Err(ExtendError::Topology(format!(
                    "{pv} joined {other} instead of {group}"
                ))
                .into());
            }
            None if self.dry_run => {}
            None => {
                return Err(ExtendError::Topology(format!("{pv} did not join {group}")).into());
            }
        }

        Ok(device)
    }

    fn update_boot_config(&mut self, device: &EncryptedDevice) -> Result<()> {
        let boot = self.services.boot;
        let uuid = device.uuid.as_deref().ok_or_else(|| ExtendError::BootConfig {
            step: "crypttab",
            cause: format!("no LUKS UUID known for {}", device.partition),
        })?;

        ui::step("Updating boot configuration");
        boot.register_encrypted_device(&device.container_name, uuid)
            .map_err(|e| boot_error("crypttab", e))?;
        boot.append_boot_parameter(uuid)
            .map_err(|e| boot_error("kernel command line", e))?;
        boot.rebuild_bootloader_config()
            .map_err(|e| boot_error("bootloader", e))?;
        boot.rebuild_boot_image()
            .map_err(|e| boot_error("initramfs", e))?;
        Ok(())
    }

    /// Refuse unsupported filesystems before anything is touched.
    fn preflight(&self, plan: &Plan) -> Result<()> {
        for target in plan.targets.all() {
            let reported = self.services.filesystems.detect_type(&target.mount_point)?;
            let fs = FsType::from_reported(&reported)?;
            tracing::debug!("{} is {} on {}", target.mount_point, fs, target.logical_volume.path);
        }
        Ok(())
    }

    fn print_summary(&self, plan: &Plan) {
        ui::separator(true);
        ui::step("Planned changes");
        let group = plan.targets.group();

        match &plan.source {
            Source::NewDisk(disk) => {
                ui::warn(format!(
                    "  ALL DATA ON {} ({}) WILL BE DESTROYED",
                    disk.path,
                    format_bytes(disk.size_bytes)
                ));
                ui::info(format!("  * Create one partition spanning {}", disk.path));
                ui::info("  * Encrypt it with LUKS and open it");
                ui::info(format!("  * Add it to volume group {group}"));
            }
            Source::ExistingPartition { disk, device, .. } => {
                ui::info(format!(
                    "  * Grow partition {} on {} ({}) to the end of the disk",
                    device.partition_number,
                    disk.path,
                    format_bytes(disk.size_bytes)
                ));
                ui::info(format!("  * Grow encryption container {}", device.container_name));
                ui::info(format!(
                    "  * Grow physical volume {} in {group}",
                    device.physical_volume()
                ));
            }
        }

        match &plan.targets {
            Targets::Single(target) => ui::info(format!(
                "  * Grow {} ({}) by all free space in {group}, then its filesystem",
                target.logical_volume.path, target.mount_point
            )),
            Targets::Split { root, secondary } => ui::info(format!(
                "  * Split the free space in {group} between {} and {} (you choose the amount for {})",
                root.mount_point, secondary.mount_point, root.mount_point
            )),
        }

        if matches!(plan.source, Source::NewDisk(_)) {
            ui::info(format!(
                "  * Register the container in {}, add it to {}, rebuild GRUB and the initramfs",
                self.settings.crypttab_path.display(),
                self.settings.grub_default_path.display()
            ));
        }
        ui::separator(true);
    }

    fn ask_target(&mut self, choices: &[MountTarget], prompt: &str) -> Result<MountTarget> {
        let items: Vec<String> = choices
            .iter()
            .map(|t| t.mount_point(self.settings).to_string())
            .collect();
        let index = self.prompter.select(prompt, &items)?;
        choices
            .get(index)
            .copied()
            .ok_or_else(|| ExtendError::Input(format!("no filesystem at menu index {index}")).into())
    }

    fn ask_disk(&mut self, prompt: &str) -> Result<DiskInfo> {
        let disks = self.services.partitions.list_disks()?;
        ui::info("Disks:");
        for disk in &disks {
            let in_use = if disk.mounted { ", in use" } else { "" };
            ui::info(format!(
                "  {:<16} {:>10}  {} partition(s){}",
                disk.path,
                format_bytes(disk.size_bytes),
                disk.partitions.len(),
                in_use
            ));
        }

        let answer = self.prompter.input(prompt)?;
        let name = answer.trim();
        if name.is_empty() {
            return Err(ExtendError::Input("no disk given".to_string()).into());
        }
        self.services
            .partitions
            .disk_info(name)?
            .ok_or_else(|| ExtendError::NotFound(format!("disk {name}")).into())
    }

    fn ask_new_disk(&mut self) -> Result<DiskInfo> {
        let disk = self.ask_disk("Name of the new, empty disk (e.g. sdb)")?;
        if !disk.is_blank() {
            return Err(ExtendError::Topology(format!(
                "{} already has partitions or is in use; refusing to overwrite it",
                disk.path
            ))
            .into());
        }
        Ok(disk)
    }

    fn ask_existing_partition(&mut self) -> Result<Source> {
        let disk = self.ask_disk("Name of the disk that was enlarged (e.g. sdb)")?;

        // Pick up the new size before looking at the partitions.
        self.services.partitions.rescan(&disk.path)?;
        let disk = self
            .services
            .partitions
            .disk_info(&disk.name)?
            .ok_or_else(|| ExtendError::NotFound(format!("disk {}", disk.path)))?;

        for partition in &disk.partitions {
            ui::info(format!(
                "  {:>3}  {:<16} {:>10}",
                partition.number,
                partition.path,
                format_bytes(partition.size_bytes)
            ));
        }

        let answer = self.prompter.input("Number of the partition to grow")?;
        let number: u32 = answer.trim().parse().map_err(|_| {
            ExtendError::Input(format!("'{}' is not a partition number", answer.trim()))
        })?;
        let partition = disk
            .partition(number)
            .ok_or_else(|| ExtendError::NotFound(format!("partition {number} on {}", disk.path)))?
            .clone();

        let container_name = self
            .services
            .encryption
            .open_container_of(&partition.path)?
            .ok_or_else(|| {
                ExtendError::Topology(format!(
                    "{} is not an open LUKS container",
                    partition.path
                ))
            })?;

        let device = EncryptedDevice {
            disk: disk.path.clone(),
            partition_number: number,
            partition: partition.path.clone(),
            container_name,
            uuid: None,
        };
        let group = self
            .inspector()
            .volume_group_of_physical_volume(&device.physical_volume())?
            .ok_or_else(|| {
                ExtendError::Topology(format!(
                    "{} is not a physical volume in any volume group",
                    device.physical_volume()
                ))
            })?;
        ui::info(format!(
            "{} -> {} -> volume group {group}",
            device.partition,
            device.physical_volume()
        ));

        Ok(Source::ExistingPartition {
            disk,
            device,
            group,
        })
    }

    fn try_resolve(&self, target: MountTarget) -> Result<Option<StorageTarget>> {
        self.inspector()
            .try_resolve_target(target, target.mount_point(self.settings))
    }

    fn resolve_both(&self) -> Result<(StorageTarget, StorageTarget)> {
        let inspector = self.inspector();
        let root = inspector.resolve_target(MountTarget::Root, &self.settings.root_mount)?;
        let secondary =
            inspector.resolve_target(MountTarget::Secondary, &self.settings.secondary_mount)?;
        Ok((root, secondary))
    }
}

fn source_group(source: &Source) -> Result<VolumeGroupId> {
    match source {
        Source::ExistingPartition { group, .. } => Ok(group.clone()),
        Source::NewDisk(disk) => {
            bail!("{} has not joined a volume group yet", disk.path)
        }
    }
}

fn target_groups(root: Option<&StorageTarget>, secondary: Option<&StorageTarget>) -> TargetGroups {
    TargetGroups {
        root: root.map(|t| t.group().clone()),
        secondary: secondary.map(|t| t.group().clone()),
    }
}

fn boot_error(step: &'static str, err: anyhow::Error) -> ExtendError {
    ExtendError::BootConfig {
        step,
        cause: format!("{err:#}"),
    }
}
