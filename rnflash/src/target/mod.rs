//! Module targets.

pub mod chip;
pub mod rn2xx3;

pub use chip::{Flasher, ModuleConfig, ModuleFamily};
