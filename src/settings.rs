//! Assembler settings.
//!
//! Settings are read once, from an optional JSON file, and handed by reference to every
//! component that needs them. Missing fields take their default value.
//!
//! ```json
//! {
//!     "volume_label": "NBOS",
//!     "partition_alignment": 2048,
//!     "tools": { "mkfs_fat": "/usr/sbin/mkfs.fat" }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::boot::BOOT_LOAD_ADDRESS;
use crate::errors::BuildError;
use crate::geometry::FLOPPY_SECTORS;

/// Longest FAT volume label.
const LABEL_MAX_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Label given to the filesystem.
    pub volume_label: String,

    /// Address the BIOS loads the boot sector at.
    pub boot_load_address: u64,

    /// Alignment of the partition start, in sectors.
    pub partition_alignment: u64,

    /// Size of a floppy image, in sectors.
    pub floppy_sectors: u64,

    /// Directory receiving the kernel, at the root of the filesystem.
    pub boot_directory: String,

    pub tools: ToolSettings,
}

/// External programs used to format and fill images.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSettings {
    pub mkfs_fat: String,
    pub mkfs_ext3: String,
    pub mmd: String,
    pub mcopy: String,
    pub mdir: String,
    pub debugfs: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume_label: String::from("NBOS"),
            boot_load_address: BOOT_LOAD_ADDRESS,
            partition_alignment: 2048,
            floppy_sectors: FLOPPY_SECTORS,
            boot_directory: String::from("boot"),
            tools: ToolSettings::default(),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            mkfs_fat: String::from("mkfs.fat"),
            mkfs_ext3: String::from("mkfs.ext3"),
            mmd: String::from("mmd"),
            mcopy: String::from("mcopy"),
            mdir: String::from("mdir"),
            debugfs: String::from("debugfs"),
        }
    }
}

impl Settings {
    /// Loads and validates the settings stored at `path`.
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let text = fs::read_to_string(path).map_err(BuildError::io(path))?;

        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, BuildError> {
        let settings: Self = serde_json::from_str(text)
            .map_err(|err| BuildError::Config(format!("malformed settings: {err}")))?;
        settings.validate()?;

        Ok(settings)
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<(), BuildError> {
        let label = &self.volume_label;
        if label.is_empty() || label.len() > LABEL_MAX_LEN || !label.is_ascii() {
            return Err(BuildError::Config(format!(
                "volume label {label:?} must be 1 to {LABEL_MAX_LEN} ASCII characters"
            )));
        }

        if self.partition_alignment == 0 {
            return Err(BuildError::Config(String::from(
                "partition alignment must be at least one sector",
            )));
        }

        if self.floppy_sectors == 0 {
            return Err(BuildError::Config(String::from(
                "floppy images must span at least one sector",
            )));
        }

        let boot = self.boot_directory.trim_matches('/');
        if boot.is_empty() || boot.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(BuildError::Config(format!(
                "invalid boot directory {:?}",
                self.boot_directory
            )));
        }

        Ok(())
    }
}
