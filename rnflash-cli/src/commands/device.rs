//! Device commands: bootloader info and reset.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use rnflash::{Flasher, VersionInfo};

use crate::commands::flash::ensure_not_interrupted;
use crate::config::Config;
use crate::serial::map_prompt_error;
use crate::{Cli, CliError, get_port, module_config};

/// Entering the bootloader wipes the application, so ask first.
fn confirm_erase(cli: &Cli, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }
    if cli.non_interactive {
        return Err(CliError::Usage(
            "Reading bootloader info erases the module firmware; pass --yes to confirm".to_string(),
        )
        .into());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Entering the bootloader erases the module firmware. Continue?")
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Aborted".to_string()).into())
    }
}

fn open_flasher(cli: &Cli, config: &mut Config) -> Result<Box<dyn Flasher>> {
    let module = module_config(cli, config)?;
    let port = get_port(cli, config)?;
    let family = module.family;
    family
        .create_flasher(&port, module)
        .with_context(|| format!("Failed to open {port}"))
}

fn version_json(identity: Option<&str>, version: &VersionInfo) -> serde_json::Value {
    serde_json::json!({
        "identity": identity,
        "version": version.version_string(),
        "device_id": format!("0x{:04X}", version.device_id),
        "erase_row_size": version.erase_row_size,
        "write_latch_size": version.write_latch_size,
        "user_id": version.user_id,
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config, yes: bool, json: bool) -> Result<()> {
    confirm_erase(cli, yes)?;
    let mut flasher = open_flasher(cli, config)?;

    let result = flasher
        .connect()
        .context("Failed to reach the bootloader")
        .and_then(|()| {
            flasher
                .version_info()
                .ok_or_else(|| anyhow::anyhow!("Bootloader sent no version information"))
        });
    let identity = flasher.identity().map(str::to_string);
    flasher.close();
    let version = result?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&version_json(identity.as_deref(), &version))?
        );
        return Ok(());
    }

    eprintln!("\n{}", style("Bootloader").bold().underlined());
    if let Some(identity) = &identity {
        eprintln!("  Previous firmware: {identity}");
    }
    eprintln!("  Version:           {}", version.version_string());
    eprintln!("  Device ID:         0x{:04X}", version.device_id);
    eprintln!("  Erase row size:    {} bytes", version.erase_row_size);
    eprintln!("  Write latch size:  {} bytes", version.write_latch_size);
    eprintln!(
        "  User ID:           {:02X} {:02X} {:02X} {:02X}",
        version.user_id[0], version.user_id[1], version.user_id[2], version.user_id[3]
    );
    eprintln!(
        "\n{} The module stays in its bootloader until flashed",
        style("ℹ").blue()
    );
    Ok(())
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;
    ensure_not_interrupted()?;

    let result = flasher.reset().context("Failed to restart the module");
    flasher.close();
    let identity = result?;

    if cli.quiet {
        println!("{identity}");
    } else {
        eprintln!("{} Running: {identity}", style("✓").green());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_json_fields() {
        let version = VersionInfo {
            version: 0x0108,
            device_id: 0x30A0,
            erase_row_size: 64,
            write_latch_size: 64,
            user_id: [1, 2, 3, 4],
        };
        let value = version_json(Some("RN2483 1.0.5"), &version);
        assert_eq!(value["identity"], "RN2483 1.0.5");
        assert_eq!(value["device_id"], "0x30A0");
        assert_eq!(value["erase_row_size"], 64);
        assert_eq!(value["user_id"][3], 4);
    }

    #[test]
    fn test_version_json_without_identity() {
        let value = version_json(None, &VersionInfo::default());
        assert!(value["identity"].is_null());
    }
}
