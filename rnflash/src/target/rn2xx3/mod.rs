//! RN2483/RN2903 support.

pub mod bootloader;
pub mod flasher;
pub mod protocol;
