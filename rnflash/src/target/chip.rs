//! Module family abstraction.
//!
//! RN2483 (868 MHz) and RN2903 (915 MHz) share the same PIC18 bootloader and
//! update procedure; they differ in the identity string the application
//! prints and the firmware images they accept.

use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::image::stream::{DEFAULT_LINE_DELAY, ImageSource, ImageSummary};
use crate::port::Port;
#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};
use crate::target::rn2xx3::bootloader::{DEFAULT_IDENTITY_TIMEOUT, DEFAULT_INPUT_BUFFER_SIZE};
use crate::target::rn2xx3::protocol::VersionInfo;

/// Supported module families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ModuleFamily {
    /// RN2483, EU 433/868 MHz.
    #[default]
    Rn2483,
    /// RN2903, US/AU 915 MHz.
    Rn2903,
}

impl ModuleFamily {
    /// Baud rate of the module application.
    #[must_use]
    pub fn default_application_baud(&self) -> u32 {
        57600
    }

    /// Baud rate used while talking to the bootloader.
    #[must_use]
    pub fn default_bootloader_baud(&self) -> u32 {
        38400
    }

    /// Prefix of the identity line the application prints on reset.
    pub fn identity_prefix(&self) -> &'static str {
        match self {
            Self::Rn2483 => "RN2483",
            Self::Rn2903 => "RN2903",
        }
    }

    /// Get the family from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "rn2483" | "2483" => Some(Self::Rn2483),
            "rn2903" | "2903" => Some(Self::Rn2903),
            _ => None,
        }
    }

    /// Recognize the family from an application identity line such as
    /// `RN2483 1.0.5 Oct 31 2018 15:06:52`.
    pub fn from_identity(line: &str) -> Option<Self> {
        [Self::Rn2483, Self::Rn2903]
            .into_iter()
            .find(|family| line.contains(family.identity_prefix()))
    }
}

impl fmt::Display for ModuleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identity_prefix())
    }
}

/// Module update parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Module family.
    pub family: ModuleFamily,
    /// Baud rate of the module application.
    pub application_baud: u32,
    /// Baud rate of the bootloader.
    pub bootloader_baud: u32,
    /// Bytes per programmed page.
    pub page_size: usize,
    /// Pause between image lines.
    pub line_delay: Duration,
    /// Deadline for the identity line after an application reset.
    pub identity_timeout: Duration,
    /// Response buffer size.
    pub input_buffer_size: usize,
    /// Attempts at reading the bootloader version when connecting.
    pub connect_attempts: usize,
}

impl ModuleConfig {
    /// Default configuration for the given family.
    pub fn new(family: ModuleFamily) -> Self {
        Self {
            family,
            application_baud: family.default_application_baud(),
            bootloader_baud: family.default_bootloader_baud(),
            page_size: 64,
            line_delay: DEFAULT_LINE_DELAY,
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            connect_attempts: 3,
        }
    }

    /// Set the bootloader baud rate.
    #[must_use]
    pub fn with_bootloader_baud(mut self, baud: u32) -> Self {
        self.bootloader_baud = baud;
        self
    }

    /// Set the application baud rate.
    #[must_use]
    pub fn with_application_baud(mut self, baud: u32) -> Self {
        self.application_baud = baud;
        self
    }

    /// Set the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the pause between image lines.
    #[must_use]
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    /// Set the identity timeout.
    #[must_use]
    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// Set the number of connect attempts.
    #[must_use]
    pub fn with_connect_attempts(mut self, attempts: usize) -> Self {
        self.connect_attempts = attempts;
        self
    }
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self::new(ModuleFamily::default())
    }
}

/// Update operations shared by all module families.
pub trait Flasher {
    /// Identify the module and bring it into its bootloader.
    ///
    /// Entering the bootloader erases the application firmware.
    fn connect(&mut self) -> Result<()>;

    /// Bootloader version read during [`Flasher::connect`].
    fn version_info(&self) -> Option<VersionInfo>;

    /// Application identity line seen during the last reset, if any.
    fn identity(&self) -> Option<&str>;

    /// Check an image without touching the device.
    fn verify_image(&mut self, image: &dyn ImageSource) -> Result<ImageSummary>;

    /// Verify, then program an image.
    ///
    /// `progress` receives (lines processed, total lines) during programming.
    fn flash_image(
        &mut self,
        image: &dyn ImageSource,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<ImageSummary>;

    /// Leave the bootloader and return the application identity line.
    fn reset(&mut self) -> Result<String>;

    /// Close the flasher and release the port.
    ///
    /// Safe to call more than once.
    fn close(&mut self);
}

impl ModuleFamily {
    /// Open `port_name` at the application baud rate and create a flasher
    /// for this family.
    #[cfg(feature = "native")]
    pub fn create_flasher(&self, port_name: &str, config: ModuleConfig) -> Result<Box<dyn Flasher>> {
        let serial = SerialConfig::new(port_name, config.application_baud);
        let port = NativePort::open(&serial)?;
        Ok(self.create_flasher_with_port(port, config))
    }

    /// Create a flasher over an already opened port.
    ///
    /// The family of `config` is replaced by `self`.
    pub fn create_flasher_with_port<P: Port + 'static>(
        &self,
        port: P,
        config: ModuleConfig,
    ) -> Box<dyn Flasher> {
        let config = ModuleConfig {
            family: *self,
            ..config
        };
        Box::new(super::rn2xx3::flasher::Rn2xx3Flasher::new(port, config))
    }
}
