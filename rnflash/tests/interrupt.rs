//! Cancellation runs in its own test binary because the checker is global.

use rnflash::{Error, HexImage, ImageStream};

#[test]
fn interrupted_pass_stops_before_first_line() {
    rnflash::set_interrupt_checker(|| true);

    let image = HexImage::from_text(":0400100001020304E2\n:00000001FF\n");
    let err = ImageStream::new(&image, 64).unwrap().verify().unwrap_err();
    assert!(matches!(err, Error::Interrupted));
}
