//! Boot image assembler.
//!
//! Turns a two-stage BIOS bootloader, a kernel and a tree of auxiliary files into a bootable
//! floppy or partitioned disk image. Partitioning, formatting and file copies are delegated to
//! external tools behind the traits of [`fs`]; the boot sector and stage2 are written directly.
#![warn(trivial_casts)]
#![allow(clippy::module_name_repetitions)]

pub mod boot;
pub mod cli;
pub mod components;
pub mod errors;
#[cfg(any(test, feature = "fakes"))]
pub mod fake;
pub mod fs;
pub mod geometry;
pub mod image;
pub mod logger;
pub mod settings;
pub mod symbols;
