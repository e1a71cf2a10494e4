mod common;

use anyhow::Result;
use common::*;
use cryptgrow::error::ExtendError;
use cryptgrow::extend::Outcome;

#[test]
fn new_disk_extends_root() -> Result<()> {
    let fake = FakeStorage::new();
    let mut prompter = ScriptedPrompter::new([
        Answer::Select(NEW_DISK_SINGLE),
        input("sdb"),
        Answer::Select(0),
        Answer::Confirm(true),
    ]);

    let outcome = run_session(&fake, &mut prompter)?;
    assert_eq!(outcome, Outcome::Completed);
    assert!(prompter.exhausted());

    assert_eq!(
        fake.calls(),
        vec![
            "sfdisk /dev/sdb",
            "partprobe /dev/sdb",
            "luksFormat /dev/sdb1",
            "luksOpen /dev/sdb1 luks-uuid-sdb1",
            "pvcreate /dev/mapper/luks-uuid-sdb1",
            "vgextend vg0 /dev/mapper/luks-uuid-sdb1",
            "lvextend -l +100%FREE /dev/vg0/root",
            "resize2fs /dev/vg0/root",
            "crypttab luks-uuid-sdb1 UUID=uuid-sdb1",
            "grub rd.luks.uuid=uuid-sdb1",
            "update-grub",
            "update-initramfs",
        ]
    );
    assert_eq!(fake.lv_size("/dev/vg0/root"), 50 * GIB);
    assert!(fake.free("vg0").is_zero());
    Ok(())
}

#[test]
fn declining_changes_nothing() -> Result<()> {
    let fake = FakeStorage::new();
    let mut prompter = ScriptedPrompter::new([
        Answer::Select(NEW_DISK_SINGLE),
        input("/dev/sdb"),
        Answer::Select(1),
        Answer::Confirm(false),
    ]);

    assert_eq!(run_session(&fake, &mut prompter)?, Outcome::Cancelled);
    assert!(fake.calls().is_empty());
    assert_eq!(fake.lv_size("/dev/vg0/home"), 10 * GIB);
    Ok(())
}

#[test]
fn disk_in_use_is_refused() {
    let fake = FakeStorage::new();
    let mut prompter = ScriptedPrompter::new([Answer::Select(NEW_DISK_SINGLE), input("sda")]);

    let err = run_session(&fake, &mut prompter).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExtendError>(),
        Some(ExtendError::Topology(_))
    ));
    assert!(fake.calls().is_empty());
}

#[test]
fn unknown_disk_is_not_found() {
    let fake = FakeStorage::new();
    let mut prompter = ScriptedPrompter::new([Answer::Select(NEW_DISK_SINGLE), input("sdz")]);

    let err = run_session(&fake, &mut prompter).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExtendError>(),
        Some(ExtendError::NotFound(_))
    ));
}

#[test]
fn new_disk_split_shares_one_group() -> Result<()> {
    let fake = FakeStorage::new();
    let mut prompter = ScriptedPrompter::new([
        Answer::Select(NEW_DISK_SPLIT),
        input("sdb"),
        Answer::Confirm(true),
        input("12.5"),
    ]);

    assert_eq!(run_session(&fake, &mut prompter)?, Outcome::Completed);
    let calls = fake.calls();
    assert!(calls.contains(&"lvextend -L +12.50g /dev/vg0/root".to_string()));
    assert!(calls.contains(&"lvextend -l +100%FREE /dev/vg0/home".to_string()));
    assert_eq!(fake.lv_size("/dev/vg0/root") + fake.lv_size("/dev/vg0/home"), 60 * GIB);
    assert!(fake.called("update-initramfs"));
    Ok(())
}

#[test]
fn new_disk_split_across_groups_offers_either_target() -> Result<()> {
    let fake = FakeStorage::split_groups();
    let mut prompter = ScriptedPrompter::new([
        Answer::Select(NEW_DISK_SPLIT),
        input("sdb"),
        Answer::Select(0),
        Answer::Confirm(true),
    ]);

    assert_eq!(run_session(&fake, &mut prompter)?, Outcome::Completed);
    assert_eq!(
        prompter.menus[1],
        vec!["Extend / only", "Extend /home only", "Return to main menu"]
    );
    assert!(fake.called("vgextend vg0 "));
    assert!(fake.called("lvextend -l +100%FREE /dev/vg0/root"));
    assert!(!fake.called("lvextend -l +100%FREE /dev/vg1/home"));
    Ok(())
}

#[test]
fn boot_config_failure_is_reported_after_resize() {
    let fake = FakeStorage::new();
    fake.fail_on("update-grub");
    let mut prompter = ScriptedPrompter::new([
        Answer::Select(NEW_DISK_SINGLE),
        input("sdb"),
        Answer::Select(0),
        Answer::Confirm(true),
    ]);

    let err = run_session(&fake, &mut prompter).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExtendError>(),
        Some(ExtendError::BootConfig { step: "bootloader", .. })
    ));
    assert!(fake.called("resize2fs /dev/vg0/root"));
    assert!(!fake.called("update-initramfs"));
}
