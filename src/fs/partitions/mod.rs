//! Partition table construction.
//!
//! Disk images carry a single bootable primary partition, starting at an aligned sector and
//! running to the end of the image. The sectors between the `MBR` and the partition start are
//! left free, stage2 is installed there.

use async_trait::async_trait;

use crate::errors::BuildError;
use crate::geometry::{align_up, sector_to_byte};
use crate::image::Image;

use self::mbr::PartitionType;

pub mod mbr;

/// A primary partition of a disk image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// First sector of the partition.
    pub start_sector: u64,

    /// Last sector of the partition (included).
    pub end_sector: u64,

    pub bootable: bool,
    pub part_type: PartitionType,
}

impl Partition {
    /// Plans the bootable partition of an image of `image_sectors` sectors.
    ///
    /// The partition starts at the first sector aligned on `alignment` after the `MBR`, and
    /// ends on the last sector of the image. The result only depends on the arguments.
    ///
    /// # Examples
    ///
    /// ```
    /// use fzimage::fs::partitions::{mbr::PartitionType, Partition};
    ///
    /// let partition = Partition::plan(32768, 2048, PartitionType::Fat32LBA).unwrap();
    /// assert_eq!(partition.start_sector, 2048);
    /// assert_eq!(partition.end_sector, 32767);
    /// ```
    pub fn plan(
        image_sectors: u64,
        alignment: u64,
        part_type: PartitionType,
    ) -> Result<Self, BuildError> {
        let start_sector = align_up(1, alignment);

        if start_sector >= image_sectors {
            return Err(BuildError::Layout(format!(
                "image of {image_sectors} sectors leaves no room for a partition aligned on \
                 {alignment} sectors"
            )));
        }

        Ok(Self {
            start_sector,
            end_sector: image_sectors - 1,
            bootable: true,
            part_type,
        })
    }

    /// Returns the partition length, in sectors.
    pub fn sectors(&self) -> u64 {
        self.end_sector - self.start_sector + 1
    }

    /// Offset of the partition in the image, in bytes.
    pub fn byte_offset(&self) -> u64 {
        sector_to_byte(self.start_sector)
    }
}

/// Writes partition tables to images.
#[async_trait]
pub trait PartitionTableWriter: Send + Sync {
    /// Writes a table holding `partition` as its only entry.
    async fn commit(&self, image: &Image, partition: &Partition) -> Result<(), BuildError>;
}
