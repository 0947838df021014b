//! RN2xx3 flasher implementation.
//!
//! ## Update Sequence
//!
//! 1. At the application baud rate, `sys reset` identifies the module.
//! 2. `sys eraseFW` erases the application; the module stays in its bootloader.
//! 3. At the bootloader baud rate, `GetVersionInfo` confirms the bootloader.
//! 4. The image is verified, then programmed page by page: each page start
//!    erases its rows, each completed page is written.
//! 5. `ResetDevice` starts the new application, which is identified again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rnflash::{HexImage, ModuleConfig, ModuleFamily};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = HexImage::from_file("RN2483_Parser.hex")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let family = ModuleFamily::Rn2483;
//!         let mut flasher = family.create_flasher("/dev/ttyACM0", ModuleConfig::new(family))?;
//!         flasher.connect()?;
//!         flasher.flash_image(&image, &mut |line, total| {
//!             println!("{line}/{total}");
//!         })?;
//!         println!("{}", flasher.reset()?);
//!     }
//!
//!     let _ = image;
//!     Ok(())
//! }
//! ```

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::page::PageSink;
use crate::image::stream::{ImageSource, ImageStream, ImageSummary, Mode};
use crate::port::Port;
use crate::target::chip::{Flasher, ModuleConfig, ModuleFamily};
use crate::target::rn2xx3::bootloader::Bootloader;
use crate::target::rn2xx3::protocol::VersionInfo;

/// Time the module needs after `sys eraseFW` before the bootloader listens.
const ERASE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Delay after changing baud rate.
const BAUD_CHANGE_DELAY: Duration = Duration::from_millis(50);

/// Delay between connection retry attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Flasher for RN2483/RN2903 modules.
///
/// Generic over the port type `P`, so it can run over a real serial port or
/// any other [`Port`] implementation.
pub struct Rn2xx3Flasher<P: Port> {
    bootloader: Bootloader<P>,
    config: ModuleConfig,
    version: Option<VersionInfo>,
    identity: Option<String>,
}

impl<P: Port> Rn2xx3Flasher<P> {
    /// Create a flasher over an opened port.
    pub fn new(port: P, config: ModuleConfig) -> Self {
        let bootloader = Bootloader::new(port)
            .with_buffer_size(config.input_buffer_size)
            .with_identity_timeout(config.identity_timeout);
        Self {
            bootloader,
            config,
            version: None,
            identity: None,
        }
    }

    /// Get the module configuration.
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Get the bootloader session.
    pub fn bootloader_mut(&mut self) -> &mut Bootloader<P> {
        &mut self.bootloader
    }

    fn switch_baud(&mut self, baud: u32) -> Result<()> {
        let port = self.bootloader.port_mut();
        if port.baud_rate() != baud {
            debug!("Switching to {baud} baud");
            port.set_baud_rate(baud)?;
            thread::sleep(BAUD_CHANGE_DELAY);
        }
        port.clear_buffers()
    }

    /// Identify the running application and ask it to enter the bootloader.
    ///
    /// Returns `false` if the application did not answer, which is the case
    /// when a previous update was interrupted and the bootloader is active.
    fn enter_bootloader(&mut self) -> Result<bool> {
        self.switch_baud(self.config.application_baud)?;

        let identity = match self.bootloader.application_reset() {
            Ok(identity) => identity,
            Err(e @ Error::Timeout(_)) => {
                warn!("No application identity ({e}); assuming the bootloader is active");
                return Ok(false);
            },
            Err(e) => return Err(e),
        };

        match ModuleFamily::from_identity(&identity) {
            Some(family) if family != self.config.family => {
                warn!("Module reports {family}, configured for {}", self.config.family);
            },
            _ => {},
        }
        self.identity = Some(identity);

        self.bootloader.erase_firmware()?;
        thread::sleep(ERASE_SETTLE_DELAY);
        Ok(true)
    }

    fn read_version(&mut self) -> Result<VersionInfo> {
        let attempts = self.config.connect_attempts;
        for attempt in 1..=attempts {
            if attempt > 1 {
                info!("Bootloader attempt {attempt}/{attempts}");
            }

            match self.bootloader.get_version_info() {
                Ok(version) => return Ok(version),
                Err(e) if attempt < attempts => {
                    warn!("Bootloader did not answer (attempt {attempt}/{attempts}): {e}");
                    thread::sleep(CONNECT_RETRY_DELAY);
                    self.bootloader.port_mut().clear_buffers()?;
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout(format!(
            "bootloader not found after {attempts} attempts"
        )))
    }

    fn stream<'a>(
        &self,
        image: &'a (dyn ImageSource + 'a),
    ) -> Result<ImageStream<'a, dyn ImageSource + 'a>> {
        Ok(ImageStream::new(image, self.config.page_size)?.with_line_delay(self.config.line_delay))
    }

    /// Erase blocks per page. Both sizes are in bytes.
    fn erase_blocks(&self, version: &VersionInfo) -> Result<u8> {
        let row = usize::from(version.erase_row_size);
        let blocks = if row == 0 {
            1
        } else {
            self.config.page_size.div_ceil(row)
        };
        u8::try_from(blocks).map_err(|_| {
            Error::Config(format!(
                "page size {} needs {blocks} erase rows",
                self.config.page_size
            ))
        })
    }
}

impl<P: Port> Flasher for Rn2xx3Flasher<P> {
    fn connect(&mut self) -> Result<()> {
        info!("Connecting to {} on {}", self.config.family, self.bootloader.port().name());

        let from_application = self.enter_bootloader()?;
        self.switch_baud(self.config.bootloader_baud)?;

        let version = self.read_version()?;
        info!(
            "Bootloader {} (device 0x{:04X}, erase row {}, write latch {})",
            version.version_string(),
            version.device_id,
            version.erase_row_size,
            version.write_latch_size
        );
        if !from_application {
            debug!("Connected to an already active bootloader");
        }
        self.version = Some(version);
        Ok(())
    }

    fn version_info(&self) -> Option<VersionInfo> {
        self.version
    }

    fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn verify_image(&mut self, image: &dyn ImageSource) -> Result<ImageSummary> {
        self.stream(image)?.verify()
    }

    fn flash_image(
        &mut self,
        image: &dyn ImageSource,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<ImageSummary> {
        let version = self
            .version
            .ok_or_else(|| Error::Config("not connected to the bootloader".into()))?;
        let erase_blocks = self.erase_blocks(&version)?;

        let mut stream = self.stream(image)?;
        info!("Verifying image ({} lines)", stream.total_lines());
        stream.verify()?;

        info!("Programming image");
        let mut sink = BootloaderSink {
            bootloader: &mut self.bootloader,
            erase_blocks,
            progress,
        };
        let summary = stream.run(Mode::Program, &mut sink)?;
        info!(
            "Programmed {} bytes in {} pages",
            summary.data_bytes, summary.pages
        );
        Ok(summary)
    }

    fn reset(&mut self) -> Result<String> {
        // Also reached without connect, e.g. after an interrupted update.
        self.switch_baud(self.config.bootloader_baud)?;
        self.bootloader.bootloader_reset()?;
        self.version = None;
        self.switch_baud(self.config.application_baud)?;

        let identity = self.bootloader.application_reset()?;
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    fn close(&mut self) {
        if let Err(e) = self.bootloader.port_mut().close() {
            debug!("Error closing port: {e}");
        }
    }
}

/// Routes page events to bootloader erase and write commands.
struct BootloaderSink<'a, P: Port> {
    bootloader: &'a mut Bootloader<P>,
    erase_blocks: u8,
    progress: &'a mut dyn FnMut(usize, usize),
}

impl<P: Port> PageSink for BootloaderSink<'_, P> {
    fn on_page_start(&mut self, address: u32) -> Result<()> {
        self.bootloader.erase_flash(address, self.erase_blocks)
    }

    fn on_page_complete(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        self.bootloader.write_flash(address, bytes)
    }

    fn on_progress(&mut self, current: usize, total: usize) {
        (self.progress)(current, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ihex::tests::encode;
    use crate::port::mock::MockPort;
    use crate::target::rn2xx3::protocol::{Command, CommandFrame, STATUS_OK};

    const IDENTITY: &[u8] = b"RN2483 1.0.5 Oct 31 2018 15:06:52\r\n";

    fn version_reply() -> Vec<u8> {
        let mut bytes = CommandFrame::new(Command::GetVersionInfo).build().to_vec();
        bytes.extend_from_slice(&[0x08, 0x01, 0, 0, 0, 0, 0x80, 0x30, 0, 0, 64, 64, 0, 0, 0, 0]);
        bytes
    }

    fn status_reply(command: Command) -> Vec<u8> {
        let mut bytes = CommandFrame::new(command).build().to_vec();
        bytes.push(STATUS_OK);
        bytes
    }

    fn config() -> ModuleConfig {
        ModuleConfig::default()
            .with_line_delay(Duration::ZERO)
            .with_identity_timeout(Duration::from_millis(50))
    }

    fn frames(tx: &[u8], command: Command) -> Vec<u32> {
        // Scan for frame headers of `command` and return their addresses.
        tx.windows(10)
            .filter(|w| w[0] == 0x55 && w[1] == command as u8 && w[4] == 0x55 && w[5] == 0xAA)
            .map(|w| u32::from_le_bytes([w[6], w[7], w[8], w[9]]))
            .collect()
    }

    #[test]
    fn test_connect_from_application() {
        let port = MockPort::new().reply(IDENTITY).reply(&version_reply());
        let mut flasher = Rn2xx3Flasher::new(port, config());

        flasher.connect().unwrap();
        assert_eq!(flasher.identity(), Some("RN2483 1.0.5 Oct 31 2018 15:06:52"));
        assert_eq!(flasher.version_info().unwrap().version, 0x0108);

        let port = flasher.bootloader.port();
        assert_eq!(port.writes[0], b"sys reset\r\n");
        assert_eq!(port.writes[1], b"sys eraseFW\r\n");
        assert_eq!(port.baud_history, vec![38400]);
        assert_eq!(port.baud_rate(), 38400);
    }

    #[test]
    fn test_connect_to_active_bootloader() {
        let port = MockPort::new().silence().reply(&version_reply());
        let mut flasher = Rn2xx3Flasher::new(port, config());

        flasher.connect().unwrap();
        assert_eq!(flasher.identity(), None);
        assert!(
            !flasher
                .bootloader
                .port()
                .writes
                .iter()
                .any(|w| w == b"sys eraseFW\r\n")
        );
    }

    #[test]
    fn test_connect_retries_version_info() {
        let port = MockPort::new()
            .reply(IDENTITY)
            .silence()
            .reply(&version_reply());
        let mut flasher = Rn2xx3Flasher::new(port, config());

        flasher.connect().unwrap();
        assert_eq!(frames(&flasher.bootloader.port().tx, Command::GetVersionInfo).len(), 2);
    }

    #[test]
    fn test_connect_gives_up() {
        let port = MockPort::new().reply(IDENTITY).silence().silence();
        let mut flasher = Rn2xx3Flasher::new(port, config().with_connect_attempts(2));

        assert!(matches!(
            flasher.connect(),
            Err(Error::NoResponse(Command::GetVersionInfo))
        ));
    }

    #[test]
    fn test_connect_refuses_foreign_module() {
        let port = MockPort::new().reply(b"RN4871 V1.41\r\n");
        let mut flasher = Rn2xx3Flasher::new(port, config());

        assert!(matches!(flasher.connect(), Err(Error::UnknownDevice(_))));
        assert_eq!(flasher.bootloader.port().writes.len(), 1);
    }

    #[test]
    fn test_flash_requires_connect() {
        let lines = [encode(0x01, 0, &[])];
        let mut flasher = Rn2xx3Flasher::new(MockPort::new(), config());
        assert!(matches!(
            flasher.flash_image(&lines, &mut |_, _| {}),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_verify_image_needs_no_device() {
        let lines = [encode(0x00, 0, &[1, 2, 3]), encode(0x01, 0, &[])];
        let mut flasher = Rn2xx3Flasher::new(MockPort::new(), config());

        let summary = flasher.verify_image(&lines).unwrap();
        assert_eq!(summary.data_bytes, 3);
        assert!(flasher.bootloader.port().tx.is_empty());
    }

    #[test]
    fn test_flash_image_erases_and_writes_each_page() {
        let lines = [
            encode(0x00, 0x0100, &[0xAA; 48]),
            encode(0x00, 0x0130, &[0xBB; 48]),
            encode(0x01, 0, &[]),
        ];
        let port = MockPort::new()
            .reply(IDENTITY)
            .reply(&version_reply())
            .reply(&status_reply(Command::EraseFlash))
            .reply(&status_reply(Command::WriteFlash))
            .reply(&status_reply(Command::EraseFlash))
            .reply(&status_reply(Command::WriteFlash));
        let mut flasher = Rn2xx3Flasher::new(port, config());
        flasher.connect().unwrap();

        let mut progress = Vec::new();
        let summary = flasher
            .flash_image(&lines, &mut |current, total| progress.push((current, total)))
            .unwrap();

        assert_eq!(summary.pages, 2);
        assert_eq!(summary.data_bytes, 96);
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);

        let tx = &flasher.bootloader.port().tx;
        assert_eq!(frames(tx, Command::EraseFlash), vec![0x0100, 0x0140]);
        assert_eq!(frames(tx, Command::WriteFlash), vec![0x0100, 0x0140]);
    }

    #[test]
    fn test_flash_image_stops_on_rejected_write() {
        let lines = [encode(0x00, 0, &[1; 8]), encode(0x01, 0, &[])];
        let mut rejected = CommandFrame::new(Command::WriteFlash).build().to_vec();
        rejected.push(0x00);
        let port = MockPort::new()
            .reply(IDENTITY)
            .reply(&version_reply())
            .reply(&status_reply(Command::EraseFlash))
            .reply(&rejected);
        let mut flasher = Rn2xx3Flasher::new(port, config());
        flasher.connect().unwrap();

        let err = flasher.flash_image(&lines, &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::Line { line: 2, .. }));
        assert!(matches!(
            err.root(),
            Error::PageFlushFailed { address: 0, .. }
        ));
    }

    #[test]
    fn test_reset_returns_new_identity() {
        let port = MockPort::new()
            .reply(IDENTITY)
            .reply(&version_reply())
            .reply(b"RN2483 1.0.5 Oct 31 2018 15:06:52\r\n");
        let mut flasher = Rn2xx3Flasher::new(port, config());
        flasher.connect().unwrap();

        let identity = flasher.reset().unwrap();
        assert!(identity.starts_with("RN2483"));
        assert_eq!(flasher.version_info(), None);
        assert_eq!(flasher.bootloader.port().baud_rate(), 57600);
    }

    #[test]
    fn test_reset_without_connect_uses_bootloader_baud() {
        let port = MockPort::new().reply(IDENTITY);
        let mut flasher = Rn2xx3Flasher::new(port, config());

        assert!(flasher.reset().unwrap().starts_with("RN2483"));
        let port = flasher.bootloader.port();
        assert_eq!(frames(&port.tx, Command::ResetDevice).len(), 1);
        assert_eq!(port.baud_history, vec![38400, 57600]);
    }

    #[test]
    fn test_erase_blocks_per_page() {
        let flasher = Rn2xx3Flasher::new(MockPort::new(), config().with_page_size(256));
        let version = VersionInfo {
            erase_row_size: 64,
            ..Default::default()
        };
        assert_eq!(flasher.erase_blocks(&version).unwrap(), 4);
        assert_eq!(flasher.erase_blocks(&VersionInfo::default()).unwrap(), 1);
    }
}
