//! crypttab, the GRUB kernel command line, and regeneration of the
//! bootloader config and initramfs so a new container unlocks at boot.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::CommandExecutor;
use crate::services::BootConfigService;

const BOOTLOADER_TOOLS: &[(&str, &[&str])] = &[
    ("update-grub", &[]),
    ("grub2-mkconfig", &["-o", "/boot/grub2/grub.cfg"]),
    ("grub-mkconfig", &["-o", "/boot/grub/grub.cfg"]),
];

const INITRAMFS_TOOLS: &[(&str, &[&str])] = &[
    ("update-initramfs", &["-u", "-k", "all"]),
    ("dracut", &["-f", "--regenerate-all"]),
    ("mkinitcpio", &["-P"]),
];

pub struct HostBootConfig {
    executor: CommandExecutor,
    crypttab: PathBuf,
    grub_default: PathBuf,
}

impl HostBootConfig {
    pub fn new(executor: CommandExecutor, crypttab: PathBuf, grub_default: PathBuf) -> Self {
        Self {
            executor,
            crypttab,
            grub_default,
        }
    }

    fn run_first_available(&self, what: &str, tools: &[(&str, &[&str])]) -> Result<()> {
        let available = tools
            .iter()
            .find(|(program, _)| which::which(program).is_ok());

        match available {
            Some((program, args)) => self.executor.run(Command::new(program).args(*args)),
            None if self.executor.dry_run => {
                crate::ui::info(format!("[DRY RUN] no {what} tool found on this host"));
                Ok(())
            }
            None => {
                let names: Vec<&str> = tools.iter().map(|(program, _)| *program).collect();
                anyhow::bail!("no {what} tool found (tried {})", names.join(", "))
            }
        }
    }
}

impl BootConfigService for HostBootConfig {
    fn register_encrypted_device(&self, container_name: &str, uuid: &str) -> Result<()> {
        let existing = match fs::read_to_string(&self.crypttab) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.crypttab.display()));
            }
        };

        let Some(line) = crypttab_entry(&existing, container_name, uuid) else {
            crate::ui::info(format!(
                "{} already lists UUID={uuid}",
                self.crypttab.display()
            ));
            return Ok(());
        };

        if self.executor.dry_run {
            crate::ui::info(format!(
                "[DRY RUN] append to {}: {}",
                self.crypttab.display(),
                line.trim_end()
            ));
            return Ok(());
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.crypttab)
            .with_context(|| format!("opening {}", self.crypttab.display()))?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.write_all(line.as_bytes())
            .with_context(|| format!("writing {}", self.crypttab.display()))?;
        tracing::info!("registered {container_name} in {}", self.crypttab.display());
        Ok(())
    }

    fn append_boot_parameter(&self, uuid: &str) -> Result<()> {
        let param = format!("rd.luks.uuid={uuid}");
        let content = fs::read_to_string(&self.grub_default)
            .with_context(|| format!("reading {}", self.grub_default.display()))?;
        let updated = add_grub_kernel_param(&content, &param);
        if updated == content {
            crate::ui::info(format!(
                "{} already passes {param}",
                self.grub_default.display()
            ));
            return Ok(());
        }

        if self.executor.dry_run {
            crate::ui::info(format!(
                "[DRY RUN] add {param} to GRUB_CMDLINE_LINUX in {}",
                self.grub_default.display()
            ));
            return Ok(());
        }

        let backup = backup_path(&self.grub_default, chrono::Local::now());
        fs::copy(&self.grub_default, &backup)
            .with_context(|| format!("backing up {} to {}", self.grub_default.display(), backup.display()))?;
        fs::write(&self.grub_default, updated)
            .with_context(|| format!("writing {}", self.grub_default.display()))?;
        tracing::info!(
            "added {param} to {} (backup at {})",
            self.grub_default.display(),
            backup.display()
        );
        Ok(())
    }

    fn rebuild_bootloader_config(&self) -> Result<()> {
        self.run_first_available("GRUB configuration", BOOTLOADER_TOOLS)
    }

    fn rebuild_boot_image(&self) -> Result<()> {
        self.run_first_available("initramfs", INITRAMFS_TOOLS)
    }
}

/// The line to append, or `None` when the UUID is already registered.
fn crypttab_entry(existing: &str, container_name: &str, uuid: &str) -> Option<String> {
    let needle = format!("UUID={uuid}");
    let present = existing
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .any(|line| line.split_whitespace().nth(1) == Some(needle.as_str()));
    if present {
        None
    } else {
        Some(format!("{container_name} {needle} none luks,discard\n"))
    }
}

fn backup_path(path: &Path, now: chrono::DateTime<chrono::Local>) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".bak_{}", now.format("%Y%m%d_%H%M%S")));
    PathBuf::from(name)
}

/// Append `param` to GRUB_CMDLINE_LINUX, adding the key if it is missing.
/// Already present parameters are left alone.
fn add_grub_kernel_param(content: &str, param: &str) -> String {
    let mut found = false;
    let mut new_lines = Vec::new();
    for line in content.lines() {
        let Some(val) = line.trim().strip_prefix("GRUB_CMDLINE_LINUX=") else {
            new_lines.push(line.to_string());
            continue;
        };
        found = true;

        let inner_val = if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            &val[1..val.len() - 1]
        } else {
            val
        };

        if inner_val.split_whitespace().any(|p| p == param) {
            new_lines.push(line.to_string());
            continue;
        }

        let new_val = if inner_val.trim().is_empty() {
            param.to_string()
        } else {
            format!("{} {}", inner_val.trim(), param)
        };
        new_lines.push(format!("GRUB_CMDLINE_LINUX=\"{}\"", new_val));
    }

    if !found {
        new_lines.push(format!("GRUB_CMDLINE_LINUX=\"{}\"", param));
    }

    let mut out = new_lines.join("\n");
    if content.ends_with('\n') || !found {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_add_grub_kernel_param() {
        let input = "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX=\"quiet splash\"\n";
        let expected = "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX=\"quiet splash rd.luks.uuid=abc\"\n";
        assert_eq!(add_grub_kernel_param(input, "rd.luks.uuid=abc"), expected);

        let input_empty = "GRUB_CMDLINE_LINUX=\"\"\n";
        assert_eq!(
            add_grub_kernel_param(input_empty, "rd.luks.uuid=abc"),
            "GRUB_CMDLINE_LINUX=\"rd.luks.uuid=abc\"\n"
        );

        let input_single = "GRUB_CMDLINE_LINUX='quiet'";
        assert_eq!(
            add_grub_kernel_param(input_single, "rd.luks.uuid=abc"),
            "GRUB_CMDLINE_LINUX=\"quiet rd.luks.uuid=abc\""
        );
    }

    #[test]
    fn grub_param_is_not_duplicated() {
        let input = "GRUB_CMDLINE_LINUX=\"rd.luks.uuid=abc quiet\"\n";
        assert_eq!(add_grub_kernel_param(input, "rd.luks.uuid=abc"), input);
    }

    #[test]
    fn grub_cmdline_added_when_missing() {
        assert_eq!(
            add_grub_kernel_param("GRUB_TIMEOUT=5\n", "rd.luks.uuid=abc"),
            "GRUB_TIMEOUT=5\nGRUB_CMDLINE_LINUX=\"rd.luks.uuid=abc\"\n"
        );
    }

    #[test]
    fn crypttab_skips_known_uuid() {
        let existing = "# <name> <device> <password> <options>\nluks-1 UUID=1111 none luks\n";
        assert_eq!(crypttab_entry(existing, "luks-1", "1111"), None);
        assert_eq!(
            crypttab_entry(existing, "luks-2222", "2222").as_deref(),
            Some("luks-2222 UUID=2222 none luks,discard\n")
        );
        let commented = "#luks-3 UUID=3333 none luks\n";
        assert!(crypttab_entry(commented, "luks-3", "3333").is_some());
    }

    #[test]
    fn backup_name_is_timestamped() {
        let now = chrono::Local
            .with_ymd_and_hms(2025, 1, 2, 3, 4, 5)
            .single()
            .unwrap();
        assert_eq!(
            backup_path(Path::new("/etc/default/grub"), now),
            PathBuf::from("/etc/default/grub.bak_20250102_030405")
        );
    }

    #[test]
    fn writes_crypttab_and_grub_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let crypttab = dir.path().join("crypttab");
        let grub = dir.path().join("grub");
        fs::write(&crypttab, "luks-1 UUID=1111 none luks").unwrap();
        fs::write(&grub, "GRUB_CMDLINE_LINUX=\"quiet\"\n").unwrap();

        let boot = HostBootConfig::new(CommandExecutor::new(false), crypttab.clone(), grub.clone());
        boot.register_encrypted_device("luks-2222", "2222").unwrap();
        boot.register_encrypted_device("luks-2222", "2222").unwrap();
        boot.append_boot_parameter("2222").unwrap();

        assert_eq!(
            fs::read_to_string(&crypttab).unwrap(),
            "luks-1 UUID=1111 none luks\nluks-2222 UUID=2222 none luks,discard\n"
        );
        assert_eq!(
            fs::read_to_string(&grub).unwrap(),
            "GRUB_CMDLINE_LINUX=\"quiet rd.luks.uuid=2222\"\n"
        );
        let backups = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("grub.bak_"))
            .count();
        assert_eq!(backups, 1);
    }
}
