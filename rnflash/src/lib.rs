//! # rnflash
//!
//! A library for updating the firmware of Microchip RN2483/RN2903 LoRa
//! modules over their serial port.
//!
//! This crate provides:
//!
//! - A streaming Intel HEX parser with checksum validation
//! - Page assembly of HEX records into page-aligned flash writes
//! - Verify and program passes over a complete image
//! - The RN2xx3 bootloader binary protocol
//!
//! ## Supported Modules
//!
//! - RN2483 (433/868 MHz)
//! - RN2903 (915 MHz)
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use rnflash::{HexImage, ImageStream, ModuleConfig, ModuleFamily};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = HexImage::from_file("RN2483_Parser.hex")?;
//!
//!     // Check the whole image before touching the module
//!     let summary = ImageStream::new(&image, 64)?.verify()?;
//!     println!("{} bytes in {} pages", summary.data_bytes, summary.pages);
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let family = ModuleFamily::Rn2483;
//!         let mut flasher = family.create_flasher("/dev/ttyACM0", ModuleConfig::new(family))?;
//!         flasher.connect()?;
//!         flasher.flash_image(&image, &mut |line, total| {
//!             println!("{line}/{total}");
//!         })?;
//!         println!("Running: {}", flasher.reset()?);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod port;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled between image lines.
///
/// The checker should return `true` when the current pass should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    device::{DetectedPort, DeviceKind},
    error::{Error, HexError, Result},
    host::{auto_detect_port, discover_module_ports, discover_ports},
    image::{
        HexImage, HexRecord, ImageSource, ImageStream, ImageSummary, Mode, PageAssembler,
        PageSink, RecordType,
    },
    port::{Port, SerialConfig},
    target::{
        Flasher, ModuleConfig, ModuleFamily,
        rn2xx3::{
            bootloader::Bootloader,
            protocol::{Command, VersionInfo},
        },
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        assert!(!is_interrupted_requested());
    }
}
