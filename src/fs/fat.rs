//! FAT boot sector inspection.
//!
//! Only the part of the BIOS parameter block shared by FAT12, FAT16 and FAT32 is decoded, which
//! is enough to check what the formatter left in the reserved region.

use bytemuck::{Pod, Zeroable};

use crate::errors::BuildError;
use crate::image::Image;

/// Size of the common BIOS parameter block, jump and OEM name included.
pub const HEADER_LEN: usize = core::mem::size_of::<BootSectorHeader>();

/// Offset of the `0x55AA` boot signature in the boot sector.
pub const BOOT_SIGNATURE_OFFSET: usize = 510;

/// First 36 bytes of a FAT boot sector.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BootSectorHeader {
    /// Jump instruction to boot code
    bs_jmpboot: [u8; 3],

    /// OEM Name Identifier
    bs_oemname: [u8; 8],

    /// Count of bytes per sector.
    bpb_byts_per_sec: u16,

    /// Number of sectors per allocation unit.
    ///
    /// This value must be a positive power of two
    bpb_sec_per_clus: u8,

    /// Number of reserved sectors in the reserved region of the volume starting at the first
    /// sector of the volume.
    ///
    /// This must not be null, but can be any non zero value
    bpb_rsvd_sec_cnt: u16,

    /// The count of File Allocation Tables (FAT) on the volume
    bpb_num_fats: u8,

    /// Count of 32-byte directory entries in the root directory (0 on FAT32).
    bpb_root_ent_cnt: u16,

    /// 16-bit total count of sectors on the volume, 0 if it does not fit.
    bpb_tot_sec_16: u16,

    /// Media descriptor byte
    bpb_media: u8,

    /// FAT12/16 count of sectors occupied by one FAT (0 on FAT32).
    bpb_fat_sz_16: u16,

    /// Sectors per track for interrupt 13h
    bpb_sec_per_trk: u16,

    /// Number of heads for interrupt 13h
    bpb_num_heads: u16,

    /// Count of hidden sectors preceding the partition that contains the FAT volume.
    bpb_hidd_sec: u32,

    /// 32-bit total count of sectors on the volume.
    bpb_tot_sec_32: u32,
}

impl BootSectorHeader {
    /// Builds a minimal header, as a formatter would write it.
    pub fn new(oem_name: [u8; 8], reserved_sectors: u16, hidden_sectors: u32, sectors: u32) -> Self {
        let (tot_sec_16, tot_sec_32) = match u16::try_from(sectors) {
            Ok(small) => (small, 0),
            Err(_) => (0, sectors),
        };

        Self {
            bs_jmpboot: [0xEB, 0x3C, 0x90],
            bs_oemname: oem_name,
            bpb_byts_per_sec: 512,
            bpb_sec_per_clus: 1,
            bpb_rsvd_sec_cnt: reserved_sectors,
            bpb_num_fats: 2,
            bpb_root_ent_cnt: 224,
            bpb_tot_sec_16: tot_sec_16,
            bpb_media: 0xF8,
            bpb_fat_sz_16: 0,
            bpb_sec_per_trk: 63,
            bpb_num_heads: 255,
            bpb_hidd_sec: hidden_sectors,
            bpb_tot_sec_32: tot_sec_32,
        }
    }

    /// Reads the header of the FAT volume starting at `offset` bytes in `image`.
    pub fn read(image: &Image, offset: u64) -> Result<Self, BuildError> {
        let bytes = image.read_at(offset, HEADER_LEN)?;

        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn oem_name(&self) -> [u8; 8] {
        self.bs_oemname
    }

    pub fn bytes_per_sector(&self) -> u16 {
        self.bpb_byts_per_sec
    }

    pub fn reserved_sectors(&self) -> u16 {
        self.bpb_rsvd_sec_cnt
    }

    pub fn hidden_sectors(&self) -> u32 {
        self.bpb_hidd_sec
    }

    /// Total count of sectors on the volume.
    pub fn total_sectors(&self) -> u32 {
        match self.bpb_tot_sec_16 {
            0 => self.bpb_tot_sec_32,
            small => u32::from(small),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::ScratchDir;

    #[test]
    fn layout() {
        assert_eq!(HEADER_LEN, 36);
    }

    #[test]
    fn decode_from_image() {
        let dir = ScratchDir::new("fat-header");
        let image = Image::allocate(&dir.path().join("disk.img"), 16).unwrap();
        let header = BootSectorHeader::new(*b"mkfs.fat", 5, 8, 70000);
        image.write_at(8 * 512, header.as_bytes()).unwrap();

        let read = BootSectorHeader::read(&image, 8 * 512).unwrap();

        assert_eq!(&read.oem_name(), b"mkfs.fat");
        assert_eq!(read.bytes_per_sector(), 512);
        assert_eq!(read.reserved_sectors(), 5);
        assert_eq!(read.hidden_sectors(), 8);
        assert_eq!(read.total_sectors(), 70000);
    }

    #[test]
    fn reserved_count_offset() {
        let header = BootSectorHeader::new(*b"FZIMAGE ", 0x0104, 0, 2880);

        assert_eq!(&header.as_bytes()[14..16], &[0x04, 0x01]);
        assert_eq!(header.total_sectors(), 2880);
    }
}
