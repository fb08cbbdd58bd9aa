//! MBR (_Master Boot Record_) partion table handling
//!
//! Legacy structure used to store partition information on hard drives, stored on the first
//! logical block of the drive.
//!
//! It limits the number of partition to 4 (without using _EBR_), and the partition sizes to 2 Terabytes at most.
//!
//! Tables are written through the `gpt` crate's MBR support, and decoded back here.

use std::fs;

use async_trait::async_trait;
use bytemuck::{Pod, Zeroable};
use gpt::mbr::{PartRecord, ProtectiveMBR};
use log::info;

use crate::errors::BuildError;
use crate::fs::partitions::{Partition, PartitionTableWriter};
use crate::image::Image;

/// Offset of the `Parition table` in the `Master Boot Record`.
pub const MBR_PART_OFFSET: u64 = 0x1BE;

/// `attributes` value of an active partition.
const ACTIVE: u8 = 0x80;

/// Heads per cylinder assumed when computing _CHS_ addresses.
const HEADS: u64 = 255;

/// Sectors per track assumed when computing _CHS_ addresses.
const SECTORS_PER_TRACK: u64 = 63;

/// Load the `Master Boot Record` partition table of an [`Image`].
pub fn read_partition_table(image: &Image) -> Result<MBRPartitionTable, BuildError> {
    let bytes = image.read_at(MBR_PART_OFFSET, core::mem::size_of::<MBRPartitionTable>())?;

    Ok(bytemuck::pod_read_unaligned(&bytes))
}

/// A `Master Boot Record` partition table.
///
/// Contains at most 4 partitions, it is the legacy way of storing partition information on the
/// disk.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MBRPartitionTable {
    partitions: [MBRPartitionEntry; 4],
}

impl MBRPartitionTable {
    /// Returns the [`MBRPartitionEntry`] corresponding to the 4 partition entry in this `MBR`.
    pub fn get_partition_metadata(&self) -> [MBRPartitionEntry; 4] {
        self.partitions
    }

    /// Returns every used entry of this `MBR`.
    pub fn used_partitions(&self) -> Vec<MBRPartitionEntry> {
        self.get_partition_metadata()
            .into_iter()
            .filter(MBRPartitionEntry::is_used)
            .collect()
    }
}

/// A `Master Boot Record` partition entry.
///
/// All related methods should use _LBA_ instead of the legacy _CHS_ addressing.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MBRPartitionEntry {
    attributes: u8,
    chs_start: [u8; 3],
    part_type: u8,
    chs_last: [u8; 3],
    lba_start: u32,
    sectors_count: u32,
}

impl MBRPartitionEntry {
    /// Checks if this partition is _active_ (or bootable).
    ///
    /// Only one partition should be active for a given [`MBRPartitionTable`]
    pub fn is_active(&self) -> bool {
        if (0x80..0x8F).contains(&self.attributes) {
            return true;
        }

        false
    }

    /// Checks if this partition is used (valid).
    pub fn is_used(&self) -> bool {
        self.part_type != 0
    }

    /// Returns this partition's starting LBA.
    ///
    /// The _LBA_ is encoded using 32 bits, which limits the maximum partition size to 2TB.
    pub fn start_lba(&self) -> u32 {
        self.lba_start
    }

    /// Returns this partition's sectors count.
    pub fn sectors_count(&self) -> u32 {
        self.sectors_count
    }

    /// Returns the packed _CHS_ address of the first sector.
    pub fn chs_start(&self) -> [u8; 3] {
        self.chs_start
    }

    /// Returns the packed _CHS_ address of the last sector.
    pub fn chs_last(&self) -> [u8; 3] {
        self.chs_last
    }

    /// Returns the [`PartitionType`] defined for this partition.
    ///
    /// Should indicate the filesystem contained in this partition.
    pub fn partition_type(&self) -> PartitionType {
        Into::<PartitionType>::into(self.part_type)
    }
}

/// Packs `lba` as a `[head, sector | cylinder high bits, cylinder low bits]` _CHS_ triple.
///
/// Addresses past the _CHS_ range saturate to `1023/254/63`.
pub fn lba_to_chs(lba: u64) -> [u8; 3] {
    let cylinder = lba / (HEADS * SECTORS_PER_TRACK);

    if cylinder > 1023 {
        return [0xFE, 0xFF, 0xFF];
    }

    let head = (lba / SECTORS_PER_TRACK) % HEADS;
    let sector = lba % SECTORS_PER_TRACK + 1;

    [
        head as u8,
        (sector as u8) | (((cylinder >> 2) & 0xC0) as u8),
        (cylinder & 0xFF) as u8,
    ]
}

/// Writes the partition table with the `gpt` crate's MBR support.
#[derive(Debug, Default, Clone, Copy)]
pub struct MbrTableWriter;

impl MbrTableWriter {
    fn record(partition: &Partition) -> Result<PartRecord, BuildError> {
        let too_far = |what: &str| {
            BuildError::Partition(format!("partition {what} exceeds the 32-bit LBA range"))
        };

        let lb_start = u32::try_from(partition.start_sector).map_err(|_| too_far("start"))?;
        let lb_size = u32::try_from(partition.sectors()).map_err(|_| too_far("size"))?;
        let [start_head, start_sector, start_track] = lba_to_chs(partition.start_sector);
        let [end_head, end_sector, end_track] = lba_to_chs(partition.end_sector);

        Ok(PartRecord {
            boot_indicator: if partition.bootable { ACTIVE } else { 0 },
            start_head,
            start_sector,
            start_track,
            os_type: partition.part_type.into(),
            end_head,
            end_sector,
            end_track,
            lb_start,
            lb_size,
        })
    }
}

#[async_trait]
impl PartitionTableWriter for MbrTableWriter {
    async fn commit(&self, image: &Image, partition: &Partition) -> Result<(), BuildError> {
        let total = u32::try_from(image.sectors().saturating_sub(1)).unwrap_or(u32::MAX);
        let mut mbr = ProtectiveMBR::with_lb_size(total);
        mbr.set_partition(0, Self::record(partition)?);

        let mut disk_image = fs::File::options()
            .write(true)
            .read(true)
            .open(image.path())
            .map_err(BuildError::io(image.path()))?;

        mbr.update_conservative(&mut disk_image)
            .map_err(|err| BuildError::Partition(format!("{err:?}")))?;

        info!(
            target: "partitions",
            "partition {} -> {} ({:?}, bootable: {})",
            partition.start_sector, partition.end_sector, partition.part_type, partition.bootable
        );

        Ok(())
    }
}

impl From<PartitionType> for u8 {
    fn from(value: PartitionType) -> Self {
        match value {
            PartitionType::Empty => 0,
            PartitionType::DOSFat12 => 1,
            PartitionType::DOS3Fat16 => 4,
            PartitionType::Extended => 5,
            PartitionType::DOS331Fat16 => 6,
            PartitionType::NTFS => 7,
            PartitionType::Fat32 => 0xB,
            PartitionType::Fat32LBA => 0xC,
            PartitionType::DOSFat16LBA => 0xE,
            PartitionType::ExtendedLBA => 0xF,
            PartitionType::LinuxSwap => 0x82,
            PartitionType::LinuxNative => 0x83,
            PartitionType::LinuxExtended => 0x85,
            PartitionType::LinuxLVM => 0x8E,
            PartitionType::GPT => 0xEE,
            PartitionType::Unknown => 0xEA,
        }
    }
}

impl From<u8> for PartitionType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Empty,
            1 => Self::DOSFat12,
            4 => Self::DOS3Fat16,
            5 => Self::Extended,
            6 => Self::DOS331Fat16,
            7 => Self::NTFS,
            0xB => Self::Fat32,
            0xC => Self::Fat32LBA,
            0xE => Self::DOSFat16LBA,
            0xF => Self::ExtendedLBA,
            0x82 => Self::LinuxSwap,
            0x83 => Self::LinuxNative,
            0x85 => Self::LinuxExtended,
            0x8E => Self::LinuxLVM,
            0xEE => Self::GPT,
            _ => Self::Unknown,
        }
    }
}

/// Known partition IDs for various filesystems, used in MBR partition entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionType {
    Empty,
    DOSFat12,
    DOS3Fat16,
    Extended,
    DOS331Fat16,
    NTFS,
    Fat32,
    Fat32LBA,
    DOSFat16LBA,
    ExtendedLBA,
    LinuxSwap,
    LinuxNative,
    LinuxExtended,
    LinuxLVM,
    GPT,
    Unknown,
}
