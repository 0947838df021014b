//! Image passes through the public API.

use std::fs;
use std::time::Duration;

use rnflash::{Error, HexError, HexImage, ImageStream, Mode, PageSink, Result};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct Pages {
    written: Vec<(u32, Vec<u8>)>,
}

impl PageSink for Pages {
    fn on_page_start(&mut self, _address: u32) -> Result<()> {
        Ok(())
    }

    fn on_page_complete(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        self.written.push((address, bytes.to_vec()));
        Ok(())
    }
}

#[test]
fn program_pass_over_file_with_extended_address() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fw.hex");
    fs::write(
        &path,
        ":020000040001F9\r\n:0400100001020304E2\r\n:00000001FF\r\n",
    )
    .unwrap();

    let image = HexImage::from_file(&path).unwrap();
    let mut stream = ImageStream::new(&image, 64)
        .unwrap()
        .with_line_delay(Duration::ZERO);
    let mut pages = Pages::default();
    let summary = stream.run(Mode::Program, &mut pages).unwrap();

    assert_eq!(summary.lines, 3);
    assert_eq!(pages.written.len(), 1);
    let (address, bytes) = &pages.written[0];
    assert_eq!(*address, 0x0001_0000);
    assert_eq!(bytes.len(), 64);
    assert_eq!(&bytes[0x10..0x14], &[1, 2, 3, 4]);
    assert!(bytes[..0x10].iter().all(|&b| b == 0xFF));
}

#[test]
fn verify_pass_names_the_failing_line() {
    init_logging();
    let image = HexImage::from_text(":0400100001020304E2\n:0400100001020304\n:00000001FF\n");

    let err = ImageStream::new(&image, 64).unwrap().verify().unwrap_err();
    match err {
        Error::Line { line, source } => {
            assert_eq!(line, 2);
            assert!(matches!(*source, Error::Hex(HexError::LengthMismatch { .. })));
        },
        other => panic!("unexpected error: {other}"),
    }
}
