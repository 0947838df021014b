//! Serial port selection.
//!
//! Resolution order: explicit `--port`, the configured port, then
//! auto-detection. Several candidates prompt via dialoguer unless running
//! non-interactively, where ambiguity is a usage error.

use std::cmp::Ordering;
use std::io::IsTerminal;

use anyhow::Result;
use console::style;
use dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme};
use log::{debug, error, info};
use rnflash::{DetectedPort, DeviceKind, discover_ports};

use crate::CliError;
use crate::config::Config;

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if ambiguous).
    pub non_interactive: bool,
}

/// Result of port selection.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known or configured bridge.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(&discover_ports(), port_name));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(&discover_ports(), port_name));
    }

    let ports = discover_ports();
    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found. Connect the module or pass --port",
        ));
    }

    let candidates = candidate_ports(ports, config);

    if options.non_interactive {
        return select_non_interactive_port(candidates, config);
    }

    match candidates.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates, config)
        },
        Ordering::Equal => {
            let port = take_single(candidates)?;
            let is_known = is_known_device(&port, config);
            if is_known {
                info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Known bridges ranked Microchip first; every port when none is known.
fn candidate_ports(ports: Vec<DetectedPort>, config: &Config) -> Vec<DetectedPort> {
    let mut known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    if known.is_empty() {
        return ports;
    }
    known.sort_by_key(|p| !p.device.is_microchip());
    known
}

fn take_single(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    ports
        .into_iter()
        .next()
        .ok_or_else(|| usage_err("No serial ports available"))
}

fn select_non_interactive_port(
    candidates: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    match candidates.len().cmp(&1) {
        Ordering::Equal => {
            let port = take_single(candidates)?;
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        },
        Ordering::Greater => Err(usage_err(
            "Found multiple serial ports; pass --port to choose one in non-interactive mode",
        )),
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

pub(crate) fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err(&format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// Find a port by name, falling back to a bare entry for unlisted names.
fn find_port_by_name(ports: &[DetectedPort], name: &str) -> SelectedPort {
    let found = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)));

    if let Some(port) = found {
        return SelectedPort {
            port: port.clone(),
            is_known: port.device.is_known(),
        };
    }

    SelectedPort {
        port: DetectedPort {
            name: name.to_string(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        },
        is_known: false,
    }
}

/// Check if a port matches a built-in bridge or a remembered USB device.
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config
            .port
            .usb_device
            .iter()
            .any(|device| device.matches(vid, pid)),
        _ => false,
    }
}

fn select_port_interactive(ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let labels = rnflash::device::format_port_list(&ports);
    let term_width = usize::from(console::Term::stderr().size().1);
    let labels: Vec<String> = labels
        .into_iter()
        .map(|label| console::truncate_str(&label, term_width.saturating_sub(4), "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the port the module is connected to")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        },
        None => Err(CliError::Cancelled("Selection cancelled".to_string()).into()),
    }
}

fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(CliError::Cancelled("Selection cancelled".to_string()).into())
    }
}

/// Offer to remember an unrecognized bridge for future auto-detection.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if is_known_device(port, config) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {vid:04X}:{pid:04X} for auto-detection?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UsbDevice;

    fn port(name: &str, vid: u16, pid: u16) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            device: DeviceKind::from_vid_pid(vid, pid),
            vid: Some(vid),
            pid: Some(pid),
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    fn exit_class(err: &anyhow::Error) -> Option<&CliError> {
        err.downcast_ref::<CliError>()
    }

    #[test]
    fn test_find_port_by_name_exact_and_case_insensitive() {
        let ports = vec![port("COM3", 0x04D8, 0x00DF)];

        let selected = find_port_by_name(&ports, "COM3");
        assert!(selected.is_known);
        assert_eq!(selected.port.device, DeviceKind::Mcp2200);

        let selected = find_port_by_name(&ports, "com3");
        assert_eq!(selected.port.name, "COM3");
    }

    #[test]
    fn test_find_port_by_name_unlisted() {
        let selected = find_port_by_name(&[], "/dev/ttyS9");
        assert_eq!(selected.port.name, "/dev/ttyS9");
        assert_eq!(selected.port.device, DeviceKind::Unknown);
        assert!(!selected.is_known);
    }

    #[test]
    fn test_is_known_device_from_config() {
        let mut config = Config::default();
        let custom = port("/dev/ttyUSB3", 0x1234, 0x5678);
        assert!(!is_known_device(&custom, &config));

        config.port.usb_device.push(UsbDevice { vid: 0x1234, pid: 0x5678 });
        assert!(is_known_device(&custom, &config));
    }

    #[test]
    fn test_candidates_prefer_microchip() {
        let ports = vec![
            port("/dev/ttyUSB0", 0x0403, 0x6001),
            port("/dev/ttyS0", 0x1234, 0x5678),
            port("/dev/ttyACM0", 0x04D8, 0x00DD),
        ];

        let candidates = candidate_ports(ports, &Config::default());
        let names: Vec<&str> = candidates.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["/dev/ttyACM0", "/dev/ttyUSB0"]);
    }

    #[test]
    fn test_candidates_fall_back_to_all_ports() {
        let ports = vec![port("/dev/ttyS0", 0x1234, 0x5678), port("/dev/ttyS1", 0x1234, 0x5679)];
        assert_eq!(candidate_ports(ports, &Config::default()).len(), 2);
    }

    #[test]
    fn test_non_interactive_single_candidate() {
        let selected = select_non_interactive_port(
            vec![port("/dev/ttyACM0", 0x04D8, 0x00DF)],
            &Config::default(),
        )
        .unwrap();
        assert_eq!(selected.port.name, "/dev/ttyACM0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_non_interactive_ambiguous_is_usage_error() {
        let err = select_non_interactive_port(
            vec![port("/dev/ttyACM0", 0x04D8, 0x00DF), port("/dev/ttyACM1", 0x04D8, 0x00DF)],
            &Config::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(exit_class(&err), Some(CliError::Usage(_))));
        assert!(err.to_string().contains("multiple"));
    }

    #[test]
    fn test_non_interactive_no_candidates_is_usage_error() {
        let err = select_non_interactive_port(Vec::new(), &Config::default())
            .err()
            .unwrap();
        assert!(matches!(exit_class(&err), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_prompt_interrupt_maps_to_cancelled() {
        let err = map_prompt_error(DialoguerError::IO(std::io::Error::from(
            std::io::ErrorKind::Interrupted,
        )));
        assert!(matches!(exit_class(&err), Some(CliError::Cancelled(_))));

        let err = map_prompt_error(DialoguerError::IO(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert!(matches!(exit_class(&err), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_explicit_port_wins() {
        let options = SerialOptions {
            port: Some("/dev/does-not-exist".into()),
            non_interactive: true,
        };
        let mut config = Config::default();
        config.port.connection.serial = Some("/dev/ttyACM7".into());

        let selected = select_serial_port(&options, &config).unwrap();
        assert_eq!(selected.port.name, "/dev/does-not-exist");
    }

    #[test]
    fn test_configured_port_used_without_detection() {
        let options = SerialOptions {
            port: None,
            non_interactive: true,
        };
        let mut config = Config::default();
        config.port.connection.serial = Some("/dev/ttyACM7".into());

        let selected = select_serial_port(&options, &config).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyACM7");
    }
}
