//! Bindings of the service traits to the real command-line tools.
//!
//! Mutating commands go through [`CommandExecutor`], which only prints them
//! in dry-run mode. Read-only queries (`lsblk`, `findmnt`, `vgs`, ...) always
//! run, so a dry run still inspects the live topology.

use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};

pub mod boot;
pub mod encryption;
pub mod filesystem;
pub mod lvm;
pub mod partition;

use crate::config::Settings;
use crate::services::Services;

#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor {
    pub dry_run: bool,
}

impl CommandExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn run(&self, command: &mut Command) -> Result<()> {
        if self.dry_run {
            self.print_dry_run(command, None);
            return Ok(());
        }
        tracing::debug!("running {}", describe(command));
        let status = command
            .status()
            .with_context(|| format!("starting {}", describe(command)))?;
        if !status.success() {
            anyhow::bail!("Command failed ({}): {}", status, describe(command));
        }
        Ok(())
    }

    pub fn run_with_input(&self, command: &mut Command, input: &str) -> Result<()> {
        if self.dry_run {
            self.print_dry_run(command, Some(input));
            return Ok(());
        }
        use std::io::Write;
        tracing::debug!("running {} with scripted input", describe(command));
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("starting {}", describe(command)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }

        let status = child.wait()?;
        if !status.success() {
            anyhow::bail!("Command failed ({}): {}", status, describe(command));
        }
        Ok(())
    }

    /// Run without failing on a non-zero exit; the caller interprets it.
    /// `None` in dry-run mode.
    pub fn run_with_output(&self, command: &mut Command) -> Result<Option<Output>> {
        if self.dry_run {
            self.print_dry_run(command, None);
            return Ok(None);
        }
        tracing::debug!("running {}", describe(command));
        let output = command
            .stdin(Stdio::inherit())
            .output()
            .with_context(|| format!("starting {}", describe(command)))?;
        tracing::debug!(
            "{} exited with {}: {}",
            describe(command),
            output.status,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(Some(output))
    }

    fn print_dry_run(&self, command: &Command, input: Option<&str>) {
        let cmd_str = describe(command);
        match input {
            Some(input_str) if input_str.contains('\n') => {
                crate::ui::info("[DRY RUN] --- BEGIN COMMAND ---");
                crate::ui::info(format!("> {cmd_str}"));
                crate::ui::block(input_str.trim());
                crate::ui::info("[DRY RUN] --- END COMMAND ---");
            }
            Some(input_str) => {
                crate::ui::info(format!("[DRY RUN] echo '{input_str}' | {cmd_str}"));
            }
            None => crate::ui::info(format!("[DRY RUN] {cmd_str}")),
        }
    }
}

fn describe(command: &Command) -> String {
    let program = command.get_program().to_string_lossy();
    let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy()).collect();
    if args.is_empty() {
        program.into_owned()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Run a read-only query and return its stdout.
pub fn query(program: &str, args: &[&str]) -> Result<String> {
    tracing::debug!("querying {} {}", program, args.join(" "));
    duct::cmd(program, args)
        .stdout_capture()
        .stderr_capture()
        .read()
        .with_context(|| format!("{} {}", program, args.join(" ")))
}

/// Like [`query`], but a non-zero exit yields `None` instead of an error.
/// Used for lookups where "no such object" is an exit code.
pub fn probe(program: &str, args: &[&str]) -> Result<Option<String>> {
    let output = duct::cmd(program, args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .with_context(|| format!("{} {}", program, args.join(" ")))?;
    if output.status.success() {
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        tracing::debug!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        Ok(None)
    }
}

/// Escalate through sudo unless already root.
pub fn ensure_root() -> Result<()> {
    if let sudo::RunningAs::User = sudo::check() {
        sudo::with_env(&["RUST_BACKTRACE", "RUST_LOG"])
            .map_err(|e| anyhow::anyhow!("Failed to escalate privileges: {}", e))?;
    }
    Ok(())
}

/// Every service bound to the host's tools.
pub struct SystemServices {
    partitions: partition::SfdiskPartitions,
    encryption: encryption::Cryptsetup,
    volumes: lvm::LvmTools,
    filesystems: filesystem::HostFilesystems,
    boot: boot::HostBootConfig,
}

impl SystemServices {
    pub fn new(settings: &Settings, dry_run: bool) -> Self {
        let executor = CommandExecutor::new(dry_run);
        Self {
            partitions: partition::SfdiskPartitions::new(executor),
            encryption: encryption::Cryptsetup::new(executor),
            volumes: lvm::LvmTools::new(executor),
            filesystems: filesystem::HostFilesystems::new(executor),
            boot: boot::HostBootConfig::new(
                executor,
                settings.crypttab_path.clone(),
                settings.grub_default_path.clone(),
            ),
        }
    }

    pub fn services(&self) -> Services<'_> {
        Services {
            partitions: &self.partitions,
            encryption: &self.encryption,
            volumes: &self.volumes,
            filesystems: &self.filesystems,
            boot: &self.boot,
        }
    }
}
