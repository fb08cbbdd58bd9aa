//! Filesystems provisioned inside images.
//!
//! A filesystem covers either the whole image (floppies, always FAT12) or the window of the
//! single partition of a disk image. FAT volumes reserve enough sectors at their start to leave
//! room for stage2.

use core::fmt::Display;
use std::str::FromStr;

use crate::errors::BuildError;
use crate::fs::partitions::mbr::PartitionType;
use crate::geometry::sector_to_byte;

pub mod copy;
pub mod debugfs;
pub mod fat;
pub mod format;
pub mod mtools;
pub mod partitions;

/// Supported filesystem families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsKind {
    Fat12,
    Fat16,
    Fat32,

    /// Journaling ext3 filesystem.
    Ext3,
}

impl FsKind {
    pub fn is_fat(&self) -> bool {
        matches!(self, Self::Fat12 | Self::Fat16 | Self::Fat32)
    }

    /// Width of a FAT entry, in bits.
    pub fn fat_bits(&self) -> Option<u8> {
        match self {
            Self::Fat12 => Some(12),
            Self::Fat16 => Some(16),
            Self::Fat32 => Some(32),
            Self::Ext3 => None,
        }
    }

    /// Returns the number of reserved sectors of a FAT volume hosting a stage2 of
    /// `stage2_sectors` sectors.
    ///
    /// The boot sector takes one sector, FAT32 needs one more for its `FSInfo` structure. Other
    /// filesystems have no reserved region.
    ///
    /// # Examples
    ///
    /// ```
    /// use fzimage::fs::FsKind;
    ///
    /// assert_eq!(FsKind::Fat16.reserved_sectors(3), Some(4));
    /// assert_eq!(FsKind::Fat32.reserved_sectors(2), Some(4));
    /// assert_eq!(FsKind::Ext3.reserved_sectors(2), None);
    /// ```
    pub fn reserved_sectors(&self, stage2_sectors: u64) -> Option<u64> {
        match self {
            Self::Fat12 | Self::Fat16 => Some(stage2_sectors + 1),
            Self::Fat32 => Some(stage2_sectors + 2),
            Self::Ext3 => None,
        }
    }

    /// Partition type advertised in the partition table for this filesystem.
    pub fn partition_type(&self) -> PartitionType {
        match self {
            Self::Fat12 => PartitionType::DOSFat12,
            Self::Fat16 => PartitionType::DOSFat16LBA,
            Self::Fat32 => PartitionType::Fat32LBA,
            Self::Ext3 => PartitionType::LinuxNative,
        }
    }
}

impl FromStr for FsKind {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fat12" => Ok(Self::Fat12),
            "fat16" => Ok(Self::Fat16),
            "fat32" => Ok(Self::Fat32),
            "ext3" => Ok(Self::Ext3),
            _ => Err(BuildError::Config(format!("unsupported filesystem {s}"))),
        }
    }
}

impl Display for FsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fat12 => "fat12",
            Self::Fat16 => "fat16",
            Self::Fat32 => "fat32",
            Self::Ext3 => "ext3",
        };

        f.write_str(name)
    }
}

/// Parameters handed to the formatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub kind: FsKind,
    pub label: String,

    /// Reserved sectors at the start of the volume (FAT only).
    pub reserved_sectors: Option<u16>,

    /// First sector of the volume in the image.
    pub offset_sectors: u64,

    /// Volume size, in sectors.
    pub sectors: u64,
}

impl VolumeSpec {
    /// Offset of the volume in the image, in bytes.
    pub fn byte_offset(&self) -> u64 {
        sector_to_byte(self.offset_sectors)
    }

    /// Volume size, in bytes.
    pub fn len_bytes(&self) -> u64 {
        sector_to_byte(self.sectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn names() {
        assert_eq!("FAT32".parse::<FsKind>().unwrap(), FsKind::Fat32);
        assert_eq!("ext3".parse::<FsKind>().unwrap(), FsKind::Ext3);
        assert_eq!(FsKind::Fat16.to_string(), "fat16");

        let err = "ntfs".parse::<FsKind>().unwrap_err();
        assert!(matches!(err, BuildError::Config(msg) if msg.contains("ntfs")));
    }

    #[test]
    fn partition_types() {
        assert_eq!(u8::from(FsKind::Fat12.partition_type()), 0x01);
        assert_eq!(u8::from(FsKind::Fat16.partition_type()), 0x0E);
        assert_eq!(u8::from(FsKind::Fat32.partition_type()), 0x0C);
        assert_eq!(u8::from(FsKind::Ext3.partition_type()), 0x83);
    }

    #[test]
    fn volume_offsets() {
        let volume = VolumeSpec {
            kind: FsKind::Fat32,
            label: String::from("NBOS"),
            reserved_sectors: Some(4),
            offset_sectors: 2048,
            sectors: 30720,
        };

        assert_eq!(volume.byte_offset(), 1024 * 1024);
        assert_eq!(volume.len_bytes(), 15 * 1024 * 1024);
    }

    proptest! {
        #[test]
        fn reserved_region_holds_stage2(k in 1u64..=255) {
            prop_assert_eq!(FsKind::Fat12.reserved_sectors(k), Some(k + 1));
            prop_assert_eq!(FsKind::Fat16.reserved_sectors(k), Some(k + 1));
            prop_assert_eq!(FsKind::Fat32.reserved_sectors(k), Some(k + 2));
        }
    }
}
