//! rnflash CLI - Command-line tool for updating RN2483/RN2903 LoRa modules.
//!
//! ## Features
//!
//! - Verify Intel HEX images offline
//! - Flash images through the module bootloader
//! - Read bootloader information and reset modules
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use rnflash::{ModuleConfig, ModuleFamily};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The user cancelled the operation (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// rnflash - Firmware updater for Microchip RN2483/RN2903 LoRa modules.
///
/// Environment variables:
///   RNFLASH_PORT              - Default serial port
///   RNFLASH_MODULE            - Module family (rn2483, rn2903)
///   RNFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "rnflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "RNFLASH_PORT")]
    port: Option<String>,

    /// Module family (defaults to the config file, then rn2483).
    #[arg(short, long, global = true, env = "RNFLASH_MODULE")]
    module: Option<Module>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "RNFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported module families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Module {
    /// RN2483 (433/868 MHz).
    Rn2483,
    /// RN2903 (915 MHz).
    Rn2903,
}

impl From<Module> for ModuleFamily {
    fn from(module: Module) -> Self {
        match module {
            Module::Rn2483 => Self::Rn2483,
            Module::Rn2903 => Self::Rn2903,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check an Intel HEX image without touching a device.
    Verify {
        /// Path to the .hex image.
        hex: PathBuf,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Program an Intel HEX image into the module.
    Flash {
        /// Path to the .hex image.
        hex: PathBuf,

        /// Stay in the bootloader after programming.
        #[arg(long)]
        no_reset: bool,
    },

    /// Enter the bootloader and show its version information.
    ///
    /// Entering the bootloader erases the module firmware.
    Info {
        /// Skip the erase confirmation.
        #[arg(short, long)]
        yes: bool,

        /// Print the information as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Leave the bootloader and print the module identity.
    Reset,

    /// List available serial ports.
    ListPorts {
        /// Print the ports as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", style("Error:").red().bold(), describe(&err));
            ExitCode::from(exit_code(&err))
        },
    }
}

/// Context chain down to the first library error, whose message already
/// embeds its own causes.
fn describe(err: &anyhow::Error) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        parts.push(cause.to_string());
        if cause.is::<rnflash::Error>() {
            break;
        }
    }
    parts.join(": ")
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_error) = err.downcast_ref::<CliError>() {
        return match cli_error {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<rnflash::Error>().map(rnflash::Error::root) {
        Some(rnflash::Error::Interrupted) => 130,
        _ => 1,
    }
}

fn run() -> Result<()> {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "rnflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    rnflash::set_interrupt_checker(was_interrupted);

    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    match &cli.command {
        Commands::Verify { hex, json } => commands::flash::cmd_verify(&cli, &config, hex, *json),
        Commands::Flash { hex, no_reset } => {
            commands::flash::cmd_flash(&cli, &mut config, hex, *no_reset)
        },
        Commands::Info { yes, json } => commands::device::cmd_info(&cli, &mut config, *yes, *json),
        Commands::Reset => commands::device::cmd_reset(&cli, &mut config),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Resolve the module parameters from flags and config.
pub(crate) fn module_config(cli: &Cli, config: &Config) -> Result<ModuleConfig> {
    let family = match cli.module {
        Some(module) => ModuleFamily::from(module),
        None => config.module_family()?.unwrap_or_default(),
    };
    Ok(config.apply(ModuleConfig::new(family)))
}

/// Get serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}
