//! In-memory storage stack and scripted answers for driving whole sessions.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use anyhow::{Result, anyhow, bail};

use cryptgrow::config::Settings;
use cryptgrow::extend::types::{DiskInfo, FsType, LogicalVolume, PartitionInfo, Usage, VolumeGroupId};
use cryptgrow::extend::{Orchestrator, Outcome, Prompter};
use cryptgrow::services::{
    BootConfigService, EncryptionService, FilesystemService, GrowOutcome, PartitionService,
    Services, VolumeManagerService,
};
use cryptgrow::units::Capacity;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Menu positions of the main menu.
pub const NEW_DISK_SINGLE: usize = 0;
pub const EXISTING_DISK_SINGLE: usize = 1;
pub const NEW_DISK_SPLIT: usize = 2;
pub const EXISTING_DISK_SPLIT: usize = 3;
pub const EXIT: usize = 4;

fn bytes(capacity: Capacity) -> u64 {
    capacity.centi_gib() * GIB / 100
}

struct Mount {
    source: String,
    fstype: String,
    lv_path: String,
}

/// A host with a system disk `sda` (LUKS on `sda2`, PV in `vg0`) and a
/// blank 20 GiB `sdb`. Every mutating call is appended to [`Self::calls`].
pub struct FakeStorage {
    disks: RefCell<Vec<DiskInfo>>,
    mounts: RefCell<HashMap<String, Mount>>,
    lvs: RefCell<HashMap<String, LogicalVolume>>,
    lv_sizes: RefCell<HashMap<String, u64>>,
    pvs: RefCell<HashMap<String, Option<VolumeGroupId>>>,
    vg_free: RefCell<HashMap<VolumeGroupId, Capacity>>,
    containers: RefCell<HashMap<String, String>>,
    /// Capacity the next `pvresize` hands to its group.
    pending_growth: RefCell<HashMap<String, Capacity>>,
    calls: RefCell<Vec<String>>,
    fail_on: RefCell<Option<String>>,
    partition_full: Cell<bool>,
    /// `vgextend` is recorded but membership and free space stay unchanged,
    /// as when every mutating command is only printed.
    print_only_joins: Cell<bool>,
}

impl FakeStorage {
    pub fn new() -> Self {
        let fake = Self {
            disks: RefCell::new(Vec::new()),
            mounts: RefCell::new(HashMap::new()),
            lvs: RefCell::new(HashMap::new()),
            lv_sizes: RefCell::new(HashMap::new()),
            pvs: RefCell::new(HashMap::new()),
            vg_free: RefCell::new(HashMap::new()),
            containers: RefCell::new(HashMap::new()),
            pending_growth: RefCell::new(HashMap::new()),
            calls: RefCell::new(Vec::new()),
            fail_on: RefCell::new(None),
            partition_full: Cell::new(false),
            print_only_joins: Cell::new(false),
        };

        fake.add_disk("sda", 50, &[1, 2], true);
        fake.add_disk("sdb", 20, &[], false);
        fake.add_container("/dev/sda2", "luks-aaaa", "vg0");
        fake.add_volume("vg0", "root", "/", "ext4", 30);
        fake.add_volume("vg0", "home", "/home", "ext4", 10);
        fake
    }

    /// Like [`Self::new`], but `/home` lives in `vg1` on the LUKS partition
    /// `sdc1`.
    pub fn split_groups() -> Self {
        let fake = Self::new();
        fake.lvs.borrow_mut().retain(|_, lv| lv.name != "home");
        fake.mounts.borrow_mut().remove("/home");
        fake.add_disk("sdc", 40, &[1], false);
        fake.add_container("/dev/sdc1", "luks-cccc", "vg1");
        fake.add_volume("vg1", "home", "/home", "ext4", 30);
        fake
    }

    pub fn add_disk(&self, name: &str, gib: u64, partitions: &[u32], mounted: bool) {
        let path = format!("/dev/{name}");
        self.disks.borrow_mut().push(DiskInfo {
            name: name.to_string(),
            path: path.clone(),
            size_bytes: gib * GIB,
            partitions: partitions
                .iter()
                .map(|n| PartitionInfo {
                    number: *n,
                    path: format!("{path}{n}"),
                    size_bytes: GIB,
                })
                .collect(),
            mounted,
        });
    }

    pub fn add_container(&self, partition: &str, name: &str, group: &str) {
        self.containers
            .borrow_mut()
            .insert(partition.to_string(), name.to_string());
        self.pvs.borrow_mut().insert(
            format!("/dev/mapper/{name}"),
            Some(VolumeGroupId(group.to_string())),
        );
        self.vg_free
            .borrow_mut()
            .entry(VolumeGroupId(group.to_string()))
            .or_insert(Capacity::ZERO);
    }

    pub fn add_volume(&self, group: &str, name: &str, mount_point: &str, fstype: &str, gib: u64) {
        let path = format!("/dev/{group}/{name}");
        let mapper = format!("/dev/mapper/{group}-{name}");
        let lv = LogicalVolume {
            group: VolumeGroupId(group.to_string()),
            name: name.to_string(),
            path: path.clone(),
        };
        self.lvs.borrow_mut().insert(path.clone(), lv.clone());
        self.lvs.borrow_mut().insert(mapper.clone(), lv);
        self.lv_sizes.borrow_mut().insert(path.clone(), gib * GIB);
        self.mounts.borrow_mut().insert(
            mount_point.to_string(),
            Mount {
                source: mapper,
                fstype: fstype.to_string(),
                lv_path: path,
            },
        );
    }

    /// The partition under `container` got `gib` bigger out of band.
    pub fn enlarge(&self, container: &str, gib: u64) {
        self.pending_growth
            .borrow_mut()
            .insert(format!("/dev/mapper/{container}"), Capacity::from_gib(gib));
    }

    pub fn set_fstype(&self, mount_point: &str, fstype: &str) {
        if let Some(mount) = self.mounts.borrow_mut().get_mut(mount_point) {
            mount.fstype = fstype.to_string();
        }
    }

    /// Make the first call starting with `prefix` fail.
    pub fn fail_on(&self, prefix: &str) {
        *self.fail_on.borrow_mut() = Some(prefix.to_string());
    }

    pub fn joins_are_printed_only(&self) {
        self.print_only_joins.set(true);
    }

    pub fn set_free(&self, group: &str, gib: u64) {
        self.vg_free
            .borrow_mut()
            .insert(VolumeGroupId(group.to_string()), Capacity::from_gib(gib));
    }

    pub fn partition_already_full(&self) {
        self.partition_full.set(true);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls.borrow().iter().any(|c| c.starts_with(prefix))
    }

    pub fn free(&self, group: &str) -> Capacity {
        self.vg_free
            .borrow()
            .get(&VolumeGroupId(group.to_string()))
            .copied()
            .unwrap_or(Capacity::ZERO)
    }

    pub fn lv_size(&self, path: &str) -> u64 {
        self.lv_sizes.borrow().get(path).copied().unwrap_or(0)
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            partitions: self,
            encryption: self,
            volumes: self,
            filesystems: self,
            boot: self,
        }
    }

    fn record(&self, call: String) -> Result<()> {
        let fail = self
            .fail_on
            .borrow()
            .as_deref()
            .is_some_and(|prefix| call.starts_with(prefix));
        self.calls.borrow_mut().push(call.clone());
        if fail {
            *self.fail_on.borrow_mut() = None;
            bail!("{call}: simulated failure");
        }
        Ok(())
    }

    fn grow_lv(&self, path: &str, amount: Capacity) {
        *self.lv_sizes.borrow_mut().entry(path.to_string()).or_insert(0) += bytes(amount);
    }
}

impl PartitionService for FakeStorage {
    fn list_disks(&self) -> Result<Vec<DiskInfo>> {
        Ok(self.disks.borrow().clone())
    }

    fn create_whole_disk_partition(&self, disk: &str) -> Result<String> {
        self.record(format!("sfdisk {disk}"))?;
        let mut disks = self.disks.borrow_mut();
        let info = disks
            .iter_mut()
            .find(|d| d.path == disk)
            .ok_or_else(|| anyhow!("no disk {disk}"))?;
        let path = format!("{disk}1");
        info.partitions = vec![PartitionInfo {
            number: 1,
            path: path.clone(),
            size_bytes: info.size_bytes,
        }];
        Ok(path)
    }

    fn grow_partition_to_full(&self, disk: &str, number: u32) -> Result<GrowOutcome> {
        self.record(format!("growpart {disk} {number}"))?;
        if self.partition_full.get() {
            Ok(GrowOutcome::Unchanged)
        } else {
            Ok(GrowOutcome::Grown)
        }
    }

    fn rescan(&self, disk: &str) -> Result<()> {
        self.record(format!("rescan {disk}"))
    }

    fn reread_partition_table(&self, disk: &str) -> Result<()> {
        self.record(format!("partprobe {disk}"))
    }
}

impl EncryptionService for FakeStorage {
    fn format(&self, partition: &str) -> Result<()> {
        self.record(format!("luksFormat {partition}"))
    }

    fn container_uuid(&self, partition: &str) -> Result<String> {
        Ok(format!("uuid-{}", partition.trim_start_matches("/dev/")))
    }

    fn open(&self, partition: &str, container_name: &str) -> Result<()> {
        self.record(format!("luksOpen {partition} {container_name}"))?;
        self.containers
            .borrow_mut()
            .insert(partition.to_string(), container_name.to_string());
        Ok(())
    }

    fn grow_container(&self, container_name: &str) -> Result<()> {
        self.record(format!("cryptsetup resize {container_name}"))
    }

    fn open_container_of(&self, partition: &str) -> Result<Option<String>> {
        Ok(self.containers.borrow().get(partition).cloned())
    }
}

impl VolumeManagerService for FakeStorage {
    fn init_physical_volume(&self, device: &str) -> Result<()> {
        self.record(format!("pvcreate {device}"))?;
        self.pvs.borrow_mut().insert(device.to_string(), None);
        Ok(())
    }

    fn join_group(&self, group: &VolumeGroupId, device: &str) -> Result<()> {
        self.record(format!("vgextend {group} {device}"))?;
        if self.print_only_joins.get() {
            return Ok(());
        }
        self.pvs
            .borrow_mut()
            .insert(device.to_string(), Some(group.clone()));
        // The new PV brings the whole 20 GiB disk.
        let mut free = self.vg_free.borrow_mut();
        let entry = free.entry(group.clone()).or_insert(Capacity::ZERO);
        *entry = *entry + Capacity::from_gib(20);
        Ok(())
    }

    fn grow_physical_volume(&self, device: &str) -> Result<()> {
        self.record(format!("pvresize {device}"))?;
        let grown = self
            .pending_growth
            .borrow_mut()
            .remove(device)
            .unwrap_or(Capacity::ZERO);
        let group = self
            .pvs
            .borrow()
            .get(device)
            .cloned()
            .flatten()
            .ok_or_else(|| anyhow!("{device} is not in a group"))?;
        let mut free = self.vg_free.borrow_mut();
        let entry = free.entry(group).or_insert(Capacity::ZERO);
        *entry = *entry + grown;
        Ok(())
    }

    fn grow_logical_volume_full(&self, volume: &LogicalVolume) -> Result<()> {
        self.record(format!("lvextend -l +100%FREE {}", volume.path))?;
        let amount = self
            .vg_free
            .borrow_mut()
            .insert(volume.group.clone(), Capacity::ZERO)
            .unwrap_or(Capacity::ZERO);
        self.grow_lv(&volume.path, amount);
        Ok(())
    }

    fn grow_logical_volume_by(&self, volume: &LogicalVolume, amount: Capacity) -> Result<()> {
        self.record(format!("lvextend -L {} {}", amount.lvm_size_arg(), volume.path))?;
        let mut free = self.vg_free.borrow_mut();
        let entry = free.entry(volume.group.clone()).or_insert(Capacity::ZERO);
        *entry = entry
            .checked_sub(amount)
            .ok_or_else(|| anyhow!("insufficient free space in {}", volume.group))?;
        drop(free);
        self.grow_lv(&volume.path, amount);
        Ok(())
    }

    fn free_capacity(&self, group: &VolumeGroupId) -> Result<Option<Capacity>> {
        Ok(self.vg_free.borrow().get(group).copied())
    }

    fn group_of_physical_volume(&self, device: &str) -> Result<Option<VolumeGroupId>> {
        Ok(self.pvs.borrow().get(device).cloned().flatten())
    }

    fn logical_volume(&self, device: &str) -> Result<Option<LogicalVolume>> {
        Ok(self.lvs.borrow().get(device).cloned())
    }
}

impl FilesystemService for FakeStorage {
    fn mount_source(&self, mount_point: &str) -> Result<Option<String>> {
        Ok(self
            .mounts
            .borrow()
            .get(mount_point)
            .map(|m| m.source.clone()))
    }

    fn detect_type(&self, mount_point: &str) -> Result<String> {
        self.mounts
            .borrow()
            .get(mount_point)
            .map(|m| m.fstype.clone())
            .ok_or_else(|| anyhow!("{mount_point} is not mounted"))
    }

    fn grow(&self, fs: &FsType, mount_point: &str, device: &str) -> Result<()> {
        match fs {
            FsType::Ext(_) => self.record(format!("resize2fs {device}")),
            FsType::Xfs => self.record(format!("xfs_growfs {mount_point}")),
        }
    }

    fn usage(&self, mount_point: &str) -> Result<Option<Usage>> {
        let mounts = self.mounts.borrow();
        let Some(mount) = mounts.get(mount_point) else {
            return Ok(None);
        };
        let size = self.lv_size(&mount.lv_path);
        Ok(Some(Usage {
            size,
            used: GIB,
            available: size.saturating_sub(GIB),
        }))
    }
}

impl BootConfigService for FakeStorage {
    fn register_encrypted_device(&self, container_name: &str, uuid: &str) -> Result<()> {
        self.record(format!("crypttab {container_name} UUID={uuid}"))
    }

    fn append_boot_parameter(&self, uuid: &str) -> Result<()> {
        self.record(format!("grub rd.luks.uuid={uuid}"))
    }

    fn rebuild_bootloader_config(&self) -> Result<()> {
        self.record("update-grub".to_string())
    }

    fn rebuild_boot_image(&self) -> Result<()> {
        self.record("update-initramfs".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Select(usize),
    Input(String),
    Confirm(bool),
}

pub fn input(text: &str) -> Answer {
    Answer::Input(text.to_string())
}

/// Replays answers in order and remembers every menu it was shown.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<Answer>,
    pub menus: Vec<Vec<String>>,
    pub questions: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            menus: Vec::new(),
            questions: Vec::new(),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.answers.is_empty()
    }

    fn next(&mut self, prompt: &str) -> Result<Answer> {
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted answer left for '{prompt}'"))
    }
}

impl Prompter for ScriptedPrompter {
    fn select(&mut self, prompt: &str, items: &[String]) -> Result<usize> {
        self.menus.push(items.to_vec());
        match self.next(prompt)? {
            Answer::Select(index) if index < items.len() => Ok(index),
            other => bail!("expected a selection for '{prompt}' ({items:?}), script has {other:?}"),
        }
    }

    fn input(&mut self, prompt: &str) -> Result<String> {
        self.questions.push(prompt.to_string());
        match self.next(prompt)? {
            Answer::Input(text) => Ok(text),
            other => bail!("expected input for '{prompt}', script has {other:?}"),
        }
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        match self.next(prompt)? {
            Answer::Confirm(answer) => Ok(answer),
            other => bail!("expected a confirmation for '{prompt}', script has {other:?}"),
        }
    }
}

pub fn test_settings() -> Settings {
    Settings {
        settle_delay_secs: 0,
        ..Settings::default()
    }
}

/// Run one full session against `fake`.
pub fn run_session(fake: &FakeStorage, prompter: &mut ScriptedPrompter) -> Result<Outcome> {
    let settings = test_settings();
    let mut orchestrator = Orchestrator::new(fake.services(), &settings, prompter, false);
    orchestrator.run()
}

/// Like [`run_session`] in dry-run mode. The configured settle delay is long
/// enough that a run which honoured it would be noticeably slow.
pub fn run_session_dry(fake: &FakeStorage, prompter: &mut ScriptedPrompter) -> Result<Outcome> {
    let settings = Settings {
        settle_delay_secs: 60,
        ..Settings::default()
    };
    let mut orchestrator = Orchestrator::new(fake.services(), &settings, prompter, true);
    orchestrator.run()
}
