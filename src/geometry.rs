//! Fixed-size sector arithmetic.
//!
//! Every placement in an image is expressed in 512-byte sectors, relative to some base sector
//! (0 for a floppy, the partition start for a partitioned disk).

/// Size of a sector, in bytes.
pub const SECTOR_SIZE: u64 = 512;

/// Size of a 1.44MB floppy, in sectors.
pub const FLOPPY_SECTORS: u64 = 2880;

/// Sector of the image where stage2 is installed, right after the boot sector.
pub const STAGE2_SECTOR: u64 = 1;

/// Returns the number of sectors needed to hold `bytes` bytes.
///
/// # Examples
///
/// ```
/// use fzimage::geometry::sectors_for_bytes;
///
/// assert_eq!(sectors_for_bytes(0), 0);
/// assert_eq!(sectors_for_bytes(512), 1);
/// assert_eq!(sectors_for_bytes(513), 2);
/// ```
pub fn sectors_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE)
}

/// Converts a sector index to the byte offset of its first byte.
pub fn sector_to_byte(sector: u64) -> u64 {
    sector * SECTOR_SIZE
}

/// Rounds `sector` up to the next multiple of `alignment`.
///
/// An `alignment` of 0 or 1 leaves the sector untouched.
pub fn align_up(sector: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return sector;
    }

    sector.div_ceil(alignment) * alignment
}
