//! Verify and flash command implementations.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rnflash::{Flasher, HexImage, ImageSource, ImageStream, ImageSummary};

use crate::config::Config;
use crate::{Cli, CliError, get_port, module_config, use_fancy_output, was_interrupted};

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

fn load_image(cli: &Cli, hex: &Path) -> Result<HexImage> {
    if !cli.quiet {
        eprintln!(
            "{} Loading image {}",
            style("📦").cyan(),
            hex.display()
        );
    }
    read_image(hex)
}

/// Load an image that holds at least one record.
fn read_image(hex: &Path) -> Result<HexImage> {
    let image = HexImage::from_file(hex)
        .with_context(|| format!("Failed to load image {}", hex.display()))?;
    if image.is_empty() {
        return Err(CliError::Usage(format!("{} contains no records", hex.display())).into());
    }
    Ok(image)
}

/// Run the verify pass at full speed; the line delay only paces the device.
fn verify_offline(image: &HexImage, page_size: usize, hex: &Path) -> Result<ImageSummary> {
    ImageStream::new(image, page_size)?
        .with_line_delay(Duration::ZERO)
        .verify()
        .with_context(|| format!("Verification of {} failed", hex.display()))
}

fn print_summary(summary: &ImageSummary) {
    eprintln!("  Lines:      {}", summary.lines);
    eprintln!("  Pages:      {}", summary.pages);
    eprintln!("  Data bytes: {}", summary.data_bytes);
    if let (Some(start), Some(end)) = (summary.start_address, summary.end_address) {
        eprintln!("  Range:      0x{start:08X}..=0x{end:08X}");
    }
}

/// Verify command implementation.
pub(crate) fn cmd_verify(cli: &Cli, config: &Config, hex: &Path, json: bool) -> Result<()> {
    let module = module_config(cli, config)?;
    let image = if json {
        read_image(hex)?
    } else {
        load_image(cli, hex)?
    };

    let summary = verify_offline(&image, module.page_size, hex)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if !cli.quiet {
        eprintln!("{} Image is valid", style("✓").green());
        print_summary(&summary);
    }
    Ok(())
}

fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)]
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} lines {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &mut Config, hex: &Path, no_reset: bool) -> Result<()> {
    let module = module_config(cli, config)?;
    let image = load_image(cli, hex)?;

    // A broken image must fail before the module firmware is erased.
    let summary = verify_offline(&image, module.page_size, hex)?;
    if !cli.quiet {
        eprintln!(
            "{} Image is valid: {} bytes in {} pages",
            style("✓").green(),
            summary.data_bytes,
            summary.pages
        );
    }
    ensure_not_interrupted()?;

    let port = get_port(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Connecting to {} on {}",
            style("🔌").cyan(),
            module.family,
            style(&port).green()
        );
    }

    let family = module.family;
    let mut flasher = family
        .create_flasher(&port, module)
        .with_context(|| format!("Failed to open {port}"))?;

    let result = program(cli, flasher.as_mut(), &image, no_reset);
    flasher.close();
    result
}

fn program(cli: &Cli, flasher: &mut dyn Flasher, image: &HexImage, no_reset: bool) -> Result<()> {
    flasher.connect().context("Failed to reach the bootloader")?;
    ensure_not_interrupted()?;

    if !cli.quiet {
        if let Some(identity) = flasher.identity() {
            eprintln!("{} Module: {identity}", style("ℹ").blue());
        }
        if let Some(version) = flasher.version_info() {
            eprintln!(
                "{} Bootloader {} (device 0x{:04X})",
                style("ℹ").blue(),
                version.version_string(),
                version.device_id
            );
        }
    }

    let pb = progress_bar(cli, image.line_count());
    pb.set_message("programming");
    let result = flasher.flash_image(image, &mut |current, total| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    });
    match result {
        Ok(summary) => {
            pb.finish_with_message("done");
            if !cli.quiet {
                eprintln!(
                    "{} Programmed {} bytes in {} pages",
                    style("✓").green(),
                    summary.data_bytes,
                    summary.pages
                );
            }
        },
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(anyhow::Error::from(e).context("Programming failed"));
        },
    }

    if no_reset {
        if !cli.quiet {
            eprintln!(
                "{} Module left in the bootloader; run `rnflash reset` to start it",
                style("ℹ").blue()
            );
        }
        return Ok(());
    }

    ensure_not_interrupted()?;
    let identity = flasher.reset().context("Failed to restart the module")?;
    if !cli.quiet {
        eprintln!("{} Running: {identity}", style("✓").green());
    }
    Ok(())
}
