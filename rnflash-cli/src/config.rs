//! Configuration file support for rnflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RNFLASH_*)
//! 3. Local config file (./rnflash.toml, ports in ./rnflash_ports.toml)
//! 4. Global config file (~/.config/rnflash/config.toml)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use log::{debug, info, warn};
use rnflash::{ModuleConfig, ModuleFamily};
use serde::{Deserialize, Serialize};

const LOCAL_CONFIG: &str = "rnflash.toml";
const LOCAL_PORTS_CONFIG: &str = "rnflash_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate of the module application.
    pub application_baud: Option<u32>,
    /// Baud rate of the bootloader.
    pub bootloader_baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Update parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Default module family ("rn2483" or "rn2903").
    pub module: Option<String>,
    /// Bytes per programmed page.
    pub page_size: Option<usize>,
    /// Pause between image lines, in milliseconds.
    pub line_delay_ms: Option<u64>,
    /// Deadline for the module identity after a reset, in milliseconds.
    pub identity_timeout_ms: Option<u64>,
    /// Attempts at reaching the bootloader.
    pub connect_attempts: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(ports) = Self::load_ports_config() {
            config.merge_ports(ports);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {e}", path.display());
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {e}", path.display());
                None
            },
        }
    }

    /// Remembered ports, local file first.
    fn load_ports_config() -> Option<PortConfig> {
        let candidates = std::iter::once(PathBuf::from(LOCAL_PORTS_CONFIG))
            .chain(Self::global_config_dir().map(|dir| dir.join("ports.toml")));

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match fs::read_to_string(&path).map(|content| toml::from_str(&content)) {
                Ok(Ok(ports)) => {
                    debug!("Loaded ports config from {}", path.display());
                    return Some(ports);
                },
                Ok(Err(e)) => warn!("Failed to parse ports file {}: {e}", path.display()),
                Err(e) => warn!("Failed to read ports file {}: {e}", path.display()),
            }
        }

        None
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rnflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Fields set in `other` win.
    fn merge(&mut self, other: Self) {
        self.merge_ports(other.port);

        let flash = other.flash;
        if flash.module.is_some() {
            self.flash.module = flash.module;
        }
        if flash.page_size.is_some() {
            self.flash.page_size = flash.page_size;
        }
        if flash.line_delay_ms.is_some() {
            self.flash.line_delay_ms = flash.line_delay_ms;
        }
        if flash.identity_timeout_ms.is_some() {
            self.flash.identity_timeout_ms = flash.identity_timeout_ms;
        }
        if flash.connect_attempts.is_some() {
            self.flash.connect_attempts = flash.connect_attempts;
        }
    }

    fn merge_ports(&mut self, other: PortConfig) {
        let connection = other.connection;
        if connection.serial.is_some() {
            self.port.connection.serial = connection.serial;
        }
        if connection.application_baud.is_some() {
            self.port.connection.application_baud = connection.application_baud;
        }
        if connection.bootloader_baud.is_some() {
            self.port.connection.bootloader_baud = connection.bootloader_baud;
        }
        for device in other.usb_device {
            if !self.port.usb_device.contains(&device) {
                self.port.usb_device.push(device);
            }
        }
    }

    /// Module family named in the config file, if any.
    pub fn module_family(&self) -> anyhow::Result<Option<ModuleFamily>> {
        match &self.flash.module {
            None => Ok(None),
            Some(name) => ModuleFamily::from_name(name)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("Unknown module `{name}` in config file")),
        }
    }

    /// Apply the configured tunables on top of `base`.
    pub fn apply(&self, base: ModuleConfig) -> ModuleConfig {
        let mut module = base;
        let connection = &self.port.connection;
        if let Some(baud) = connection.application_baud {
            module = module.with_application_baud(baud);
        }
        if let Some(baud) = connection.bootloader_baud {
            module = module.with_bootloader_baud(baud);
        }
        if let Some(page_size) = self.flash.page_size {
            module = module.with_page_size(page_size);
        }
        if let Some(ms) = self.flash.line_delay_ms {
            module = module.with_line_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.flash.identity_timeout_ms {
            module = module.with_identity_timeout(Duration::from_millis(ms));
        }
        if let Some(attempts) = self.flash.connect_attempts {
            module = module.with_connect_attempts(attempts);
        }
        module
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        let path = if Path::new(LOCAL_PORTS_CONFIG).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS_CONFIG)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS_CONFIG)
        };

        self.port.usb_device.push(device);

        let content = toml::to_string_pretty(&self.port)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}
