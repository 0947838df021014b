//! Firmware image handling.
//!
//! - [`ihex`]: decoding of single Intel HEX records
//! - [`page`]: assembly of records into page-aligned writes
//! - [`stream`]: verify and program passes over a whole image

pub mod ihex;
pub mod page;
pub mod stream;

pub use ihex::{HexRecord, RecordType};
pub use page::{AddressContext, Outcome, PageAssembler, PageSink};
pub use stream::{HexImage, ImageSource, ImageStream, ImageSummary, Mode};
