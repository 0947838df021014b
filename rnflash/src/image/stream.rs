//! Line-by-line image passes.
//!
//! An [`ImageStream`] walks an [`ImageSource`], decodes each line and feeds
//! the record to a [`PageAssembler`]. The same pass runs in two modes:
//! [`Mode::Verify`] checks the whole image without side effects, while
//! [`Mode::Program`] forwards page events to a [`PageSink`].
//!
//! ```rust
//! use rnflash::image::{HexImage, ImageStream};
//!
//! let image = HexImage::from_text(":0400100001020304E2\n:00000001FF\n");
//! let summary = ImageStream::new(&image, 64)?.verify()?;
//! assert_eq!(summary.data_bytes, 4);
//! # Ok::<(), rnflash::Error>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::image::ihex::{HexRecord, RecordType};
use crate::image::page::{Outcome, PageAssembler, PageSink};

/// Default pause between two lines.
pub const DEFAULT_LINE_DELAY: Duration = Duration::from_millis(1);

/// Indexed access to the lines of a hex image.
pub trait ImageSource {
    /// Number of lines.
    fn line_count(&self) -> usize;

    /// Line at `index`, without terminator.
    fn line(&self, index: usize) -> &str;
}

impl<S: AsRef<str>> ImageSource for [S] {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line(&self, index: usize) -> &str {
        self[index].as_ref()
    }
}

impl<S: AsRef<str>, const N: usize> ImageSource for [S; N] {
    fn line_count(&self) -> usize {
        N
    }

    fn line(&self, index: usize) -> &str {
        self[index].as_ref()
    }
}

impl<S: AsRef<str>> ImageSource for Vec<S> {
    fn line_count(&self) -> usize {
        self.len()
    }

    fn line(&self, index: usize) -> &str {
        self[index].as_ref()
    }
}

/// A hex image held in memory.
#[derive(Debug, Clone, Default)]
pub struct HexImage {
    lines: Vec<String>,
    path: Option<PathBuf>,
}

impl HexImage {
    /// Load an image from a `.hex` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut image = Self::from_text(&text);
        image.path = Some(path.to_path_buf());
        debug!("Loaded {} lines from {}", image.lines.len(), path.display());
        Ok(image)
    }

    /// Split text into lines, dropping line terminators and blank lines.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
            path: None,
        }
    }

    /// File the image was loaded from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the image has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl ImageSource for HexImage {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, index: usize) -> &str {
        &self.lines[index]
    }
}

/// Pass mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Validate only; page events are suppressed.
    Verify,
    /// Forward page events to the sink.
    Program,
}

/// Result of a completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageSummary {
    /// Lines processed, including the end-of-file record.
    pub lines: usize,
    /// Pages touched.
    pub pages: usize,
    /// Data bytes placed.
    pub data_bytes: usize,
    /// Lowest absolute data address.
    pub start_address: Option<u32>,
    /// Highest absolute data address.
    pub end_address: Option<u32>,
}

/// Drives passes over one image.
pub struct ImageStream<'a, I: ImageSource + ?Sized> {
    source: &'a I,
    assembler: PageAssembler,
    line_delay: Duration,
}

impl<'a, I: ImageSource + ?Sized> ImageStream<'a, I> {
    /// Create a stream that assembles pages of `page_size` bytes.
    pub fn new(source: &'a I, page_size: usize) -> Result<Self> {
        Ok(Self {
            source,
            assembler: PageAssembler::new(page_size)?,
            line_delay: DEFAULT_LINE_DELAY,
        })
    }

    /// Set the pause between lines. Zero disables it.
    #[must_use]
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    /// Total lines in the source.
    pub fn total_lines(&self) -> usize {
        self.source.line_count()
    }

    /// Validate the image without side effects.
    pub fn verify(&mut self) -> Result<ImageSummary> {
        self.run(Mode::Verify, &mut Discard)
    }

    /// Run one full pass.
    ///
    /// The first failing line aborts the pass; its error is wrapped with the
    /// 1-based line number. Pages flushed before the failure are not undone.
    pub fn run(&mut self, mode: Mode, sink: &mut dyn PageSink) -> Result<ImageSummary> {
        let source = self.source;
        let total = source.line_count();
        self.assembler.begin(mode == Mode::Program);
        info!("Starting {mode:?} pass over {total} lines");

        let mut summary = ImageSummary::default();
        for index in 0..total {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            if index > 0 && !self.line_delay.is_zero() {
                thread::sleep(self.line_delay);
            }

            let outcome = self
                .process_line(source.line(index), &mut summary, sink)
                .map_err(|e| e.at_line(index + 1))?;
            summary.lines = index + 1;
            sink.on_progress(index + 1, total);

            if outcome == Outcome::EndOfImage {
                summary.pages = self.assembler.pages();
                summary.data_bytes = self.assembler.data_bytes();
                info!(
                    "{mode:?} pass complete: {} lines, {} pages, {} bytes",
                    summary.lines, summary.pages, summary.data_bytes
                );
                return Ok(summary);
            }
        }

        Err(Error::MissingEndOfFile)
    }

    fn process_line(
        &mut self,
        line: &str,
        summary: &mut ImageSummary,
        sink: &mut dyn PageSink,
    ) -> Result<Outcome> {
        let record = HexRecord::parse(line.trim_end())?;

        if record.record_type == RecordType::Data && !record.data.is_empty() {
            let context = self.assembler.context();
            let first = context.absolute(record.address, 0);
            let last = context.absolute(record.address, record.data.len() - 1);
            summary.start_address = Some(summary.start_address.map_or(first, |a| a.min(first)));
            summary.end_address = Some(summary.end_address.map_or(last, |a| a.max(last)));
        }

        self.assembler.consume(&record, sink)
    }
}

/// Sink used by verify passes.
struct Discard;

impl PageSink for Discard {
    fn on_page_start(&mut self, _address: u32) -> Result<()> {
        Ok(())
    }

    fn on_page_complete(&mut self, _address: u32, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}
