//! Bootloader stages installation.
//!
//! Stage1 is the boot sector program, stage2 the loader it reads from the sectors following it.

pub mod stage1;
pub mod stage2;

pub use stage1::{install_stage1, BootSymbols, Stage2Location, BOOT_LOAD_ADDRESS};
pub use stage2::install_stage2;
