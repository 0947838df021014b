//! Page assembly: turns decoded records into page-aligned flash writes.
//!
//! Data bytes are placed into a single page buffer. When a byte lands outside
//! the active page, the page is handed to a [`PageSink`] and a fresh page,
//! pre-filled with the erased-flash value `0xFF`, is started at the aligned
//! address that contains the byte.

use log::{debug, trace};

use crate::error::{Error, HexError, Result};
use crate::image::ihex::{HexRecord, RecordType};

/// Value of erased flash.
pub const ERASED: u8 = 0xFF;

/// Receiver of page lifecycle events during a programming pass.
///
/// Calls are made synchronously from inside the pass; an implementation must
/// not start another pass over the same assembler.
pub trait PageSink {
    /// A new page starting at `address` is about to be filled.
    fn on_page_start(&mut self, address: u32) -> Result<()>;

    /// The page starting at `address` is complete and should be committed.
    fn on_page_complete(&mut self, address: u32, bytes: &[u8]) -> Result<()>;

    /// `current` of `total` image lines have been processed.
    fn on_progress(&mut self, _current: usize, _total: usize) {}
}

/// Running extended-address state of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressContext {
    /// Offset added to every data record address.
    pub extended_offset: u32,
}

impl AddressContext {
    /// Absolute address of byte `index` in a data record at `address`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn absolute(&self, address: u16, index: usize) -> u32 {
        self.extended_offset
            .wrapping_add(u32::from(address))
            .wrapping_add(index as u32)
    }
}

/// What the caller should do after a record has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Feed the next record.
    Continue,
    /// The end-of-file record was reached and the last page flushed.
    EndOfImage,
}

/// Buffers data records into page-sized writes.
#[derive(Debug)]
pub struct PageAssembler {
    page: Vec<u8>,
    page_size: u32,
    page_start: Option<u32>,
    dirty: bool,
    live: bool,
    context: AddressContext,
    pages: usize,
    data_bytes: usize,
}

impl PageAssembler {
    /// Create an assembler for pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Result<Self> {
        let size = u32::try_from(page_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| Error::Config(format!("invalid page size {page_size}")))?;

        Ok(Self {
            page: vec![ERASED; page_size],
            page_size: size,
            page_start: None,
            dirty: false,
            live: false,
            context: AddressContext::default(),
            pages: 0,
            data_bytes: 0,
        })
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page.len()
    }

    /// Start a new pass: clear the address context and any active page.
    ///
    /// In live mode the sink receives page events; otherwise the same
    /// bookkeeping runs without touching it.
    pub fn begin(&mut self, live: bool) {
        self.live = live;
        self.context = AddressContext::default();
        self.page_start = None;
        self.dirty = false;
        self.pages = 0;
        self.data_bytes = 0;
    }

    /// Whether page events are forwarded to the sink.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Current address context.
    pub fn context(&self) -> AddressContext {
        self.context
    }

    /// Start address of the active page, if any.
    pub fn page_start(&self) -> Option<u32> {
        self.page_start
    }

    /// Pages started in this pass.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Data bytes placed in this pass.
    pub fn data_bytes(&self) -> usize {
        self.data_bytes
    }

    /// Apply one validated record.
    pub fn consume(&mut self, record: &HexRecord, sink: &mut dyn PageSink) -> Result<Outcome> {
        match record.record_type {
            RecordType::Data => {
                for (i, &byte) in record.data.iter().enumerate() {
                    let target = self.context.absolute(record.address, i);
                    self.write_byte(target, byte, sink)?;
                }
                self.data_bytes += record.data.len();
                Ok(Outcome::Continue)
            },
            RecordType::ExtendedLinearAddress => {
                self.context.extended_offset = u32::from(address_value(record)?) << 16;
                debug!("Extended linear offset 0x{:08X}", self.context.extended_offset);
                Ok(Outcome::Continue)
            },
            RecordType::ExtendedSegmentAddress => {
                self.context.extended_offset = u32::from(address_value(record)?) << 4;
                debug!("Extended segment offset 0x{:08X}", self.context.extended_offset);
                Ok(Outcome::Continue)
            },
            RecordType::EndOfFile => {
                self.flush(sink)?;
                Ok(Outcome::EndOfImage)
            },
            RecordType::StartSegmentAddress | RecordType::StartLinearAddress => {
                Err(Error::UnsupportedRecord(record.record_type))
            },
        }
    }

    fn write_byte(&mut self, target: u32, byte: u8, sink: &mut dyn PageSink) -> Result<()> {
        let start = match self.page_start {
            Some(start) if target.wrapping_sub(start) < self.page_size => start,
            _ => {
                self.flush(sink)?;
                self.start_page(target, sink)?
            },
        };

        let offset = (target - start) as usize;
        self.page[offset] = byte;
        self.dirty = true;
        Ok(())
    }

    fn start_page(&mut self, target: u32, sink: &mut dyn PageSink) -> Result<u32> {
        let start = target / self.page_size * self.page_size;
        trace!("Starting page at 0x{start:08X}");

        if self.live {
            sink.on_page_start(start)
                .map_err(|e| Error::PageStartFailed {
                    address: start,
                    source: Box::new(e),
                })?;
        }

        self.page.fill(ERASED);
        self.page_start = Some(start);
        self.pages += 1;
        Ok(start)
    }

    fn flush(&mut self, sink: &mut dyn PageSink) -> Result<()> {
        let Some(start) = self.page_start else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        if self.live {
            trace!("Completing page at 0x{start:08X}");
            sink.on_page_complete(start, &self.page)
                .map_err(|e| Error::PageFlushFailed {
                    address: start,
                    source: Box::new(e),
                })?;
        }
        self.dirty = false;
        Ok(())
    }
}

fn address_value(record: &HexRecord) -> Result<u16> {
    record
        .address_value()
        .ok_or(Error::Hex(HexError::MalformedLine(
            "address record needs two data bytes",
        )))
}
