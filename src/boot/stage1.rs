//! Boot sector (stage1) installation.
//!
//! Stage1 is loaded by the BIOS at [`BOOT_LOAD_ADDRESS`]. It finds stage2 through two fields
//! patched in at build time, located at the `stage2_location` symbol:
//!
//! | offset | size | content                          |
//! |--------|------|----------------------------------|
//! | 0      | 4    | stage2 start sector (LE)         |
//! | 4      | 1    | stage2 size, in sectors          |
//!
//! The boot sector of a FAT volume also carries the BIOS parameter block, between the jump
//! instruction and the entry point. Installation keeps the parameter block written by the
//! formatter, and only copies the jump and everything from `__entry_start` onwards.

use log::{debug, info};

use crate::errors::BuildError;
use crate::geometry::{sector_to_byte, SECTOR_SIZE};
use crate::image::Image;
use crate::symbols::LinkMap;

/// Address where the BIOS loads the boot sector.
pub const BOOT_LOAD_ADDRESS: u64 = 0x7C00;

/// Length of the jump instruction at the start of the boot sector.
pub const JUMP_LEN: usize = 3;

/// Largest stage1 binary accepted.
pub const STAGE1_MAX_LEN: usize = SECTOR_SIZE as usize;

/// Symbol marking the boot sector's entry point (end of the parameter block).
pub const ENTRY_SYMBOL: &str = "__entry_start";

/// Symbol marking the stage2 location fields.
pub const STAGE2_LOCATION_SYMBOL: &str = "stage2_location";

/// Size of the patched fields at `stage2_location`.
pub const PATCH_LEN: usize = 5;

/// Where stage2 lives on the image, as seen by stage1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage2Location {
    start_sector: u32,
    sectors: u8,
}

impl Stage2Location {
    /// Describes a stage2 of `sectors` sectors starting at `start_sector`.
    ///
    /// # Errors
    ///
    /// The size field is a single byte, stage2 must span 1 to 255 sectors. The start sector must
    /// fit in 32 bits.
    pub fn new(start_sector: u64, sectors: u64) -> Result<Self, BuildError> {
        let sectors = u8::try_from(sectors)
            .ok()
            .filter(|count| *count != 0)
            .ok_or_else(|| {
                BuildError::InvalidStage2(format!(
                    "stage2 spans {sectors} sectors, expected between 1 and 255"
                ))
            })?;

        let start_sector = u32::try_from(start_sector).map_err(|_| {
            BuildError::InvalidStage2(format!("start sector {start_sector} exceeds 32 bits"))
        })?;

        Ok(Self {
            start_sector,
            sectors,
        })
    }

    pub fn start_sector(&self) -> u32 {
        self.start_sector
    }

    pub fn sectors(&self) -> u8 {
        self.sectors
    }

    /// Encodes the patch fields.
    pub fn to_bytes(self) -> [u8; PATCH_LEN] {
        let mut bytes = [0u8; PATCH_LEN];
        bytes[..4].copy_from_slice(&self.start_sector.to_le_bytes());
        bytes[4] = self.sectors;
        bytes
    }
}

/// Offsets of the stage1 symbols, relative to the start of the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSymbols {
    pub entry_offset: usize,
    pub stage2_location_offset: usize,
}

impl BootSymbols {
    /// Resolves [`ENTRY_SYMBOL`] and [`STAGE2_LOCATION_SYMBOL`] in `map`.
    pub fn resolve(map: &LinkMap, load_address: u64) -> Result<Self, BuildError> {
        let offset = |symbol: &str| -> Result<usize, BuildError> {
            let address = map.resolve(symbol)?;
            address
                .checked_sub(load_address)
                .and_then(|offset| usize::try_from(offset).ok())
                .ok_or_else(|| {
                    BuildError::InvalidStage1(format!(
                        "{symbol} ({address:#x}) lies before the load address {load_address:#x}"
                    ))
                })
        };

        Ok(Self {
            entry_offset: offset(ENTRY_SYMBOL)?,
            stage2_location_offset: offset(STAGE2_LOCATION_SYMBOL)?,
        })
    }
}

/// Merges `stage1` into `current`, the boot sector as left by the formatter.
///
/// Returns the bytes to write at the start of the volume, `stage1.len()` bytes long.
pub fn compose_boot_sector(
    current: &[u8],
    stage1: &[u8],
    symbols: BootSymbols,
    location: Stage2Location,
) -> Result<Vec<u8>, BuildError> {
    if stage1.len() > STAGE1_MAX_LEN {
        return Err(BuildError::InvalidStage1(format!(
            "stage1 is {} bytes long, it must fit in {STAGE1_MAX_LEN} bytes",
            stage1.len()
        )));
    }

    let entry = symbols.entry_offset;
    if entry < JUMP_LEN || entry > stage1.len() {
        return Err(BuildError::InvalidStage1(format!(
            "entry point at offset {entry:#x} is outside [{JUMP_LEN:#x}, {:#x}]",
            stage1.len()
        )));
    }

    let patch = symbols.stage2_location_offset;
    let patch_end = patch
        .checked_add(PATCH_LEN)
        .filter(|end| *end <= stage1.len())
        .ok_or_else(|| {
            BuildError::InvalidStage1(format!(
                "stage2 location at offset {patch:#x} does not fit in stage1 ({} bytes)",
                stage1.len()
            ))
        })?;

    let mut sector = vec![0u8; stage1.len()];
    let kept = current.len().min(stage1.len());
    sector[..kept].copy_from_slice(&current[..kept]);

    sector[..JUMP_LEN].copy_from_slice(&stage1[..JUMP_LEN]);
    sector[entry..].copy_from_slice(&stage1[entry..]);
    sector[patch..patch_end].copy_from_slice(&location.to_bytes());

    Ok(sector)
}

/// Installs stage1 at `base_sector` of `image`, patched to load stage2 from `location`.
pub fn install_stage1(
    image: &Image,
    base_sector: u64,
    stage1: &[u8],
    map: &LinkMap,
    load_address: u64,
    location: Stage2Location,
) -> Result<(), BuildError> {
    let symbols = BootSymbols::resolve(map, load_address)?;
    debug!(
        target: "stage1",
        "entry at {:#x}, stage2 location at {:#x}",
        symbols.entry_offset, symbols.stage2_location_offset
    );

    let offset = sector_to_byte(base_sector);
    let current = image.read_at(offset, stage1.len().min(STAGE1_MAX_LEN))?;
    let sector = compose_boot_sector(&current, stage1, symbols, location)?;
    image.write_at(offset, &sector)?;

    info!(
        target: "stage1",
        "installed at sector {base_sector}, stage2 at sector {} ({} sectors)",
        location.start_sector(),
        location.sectors()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SYMBOLS: BootSymbols = BootSymbols {
        entry_offset: 0x3e,
        stage2_location_offset: 0x1b0,
    };

    fn stage1() -> Vec<u8> {
        (0..512).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn stage2_sector_count_range() {
        assert!(Stage2Location::new(1, 0).is_err());
        assert!(Stage2Location::new(1, 256).is_err());
        assert_eq!(Stage2Location::new(1, 255).unwrap().sectors(), 255);
        assert!(Stage2Location::new(u64::from(u32::MAX) + 1, 3).is_err());
    }

    #[test]
    fn patch_fields_encoding() {
        let location = Stage2Location::new(0x0102_0304, 3).unwrap();

        assert_eq!(location.to_bytes(), [0x04, 0x03, 0x02, 0x01, 3]);
    }

    #[test]
    fn keeps_parameter_block() {
        let formatted: Vec<u8> = (0..512).map(|i| 0xF0 | (i % 16) as u8).collect();
        let stage1 = stage1();
        let location = Stage2Location::new(1, 3).unwrap();

        let sector = compose_boot_sector(&formatted, &stage1, SYMBOLS, location).unwrap();

        assert_eq!(&sector[..3], &stage1[..3]);
        assert_eq!(&sector[3..0x3e], &formatted[3..0x3e]);
        assert_eq!(&sector[0x1b0..0x1b5], &[1, 0, 0, 0, 3]);
        assert_eq!(&sector[0x1b5..], &stage1[0x1b5..]);
    }

    #[test]
    fn rejects_oversized_stage1() {
        let stage1 = vec![0u8; 513];
        let err = compose_boot_sector(&[], &stage1, SYMBOLS, Stage2Location::new(1, 1).unwrap())
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidStage1(_)));
    }

    #[test]
    fn rejects_entry_inside_jump() {
        let symbols = BootSymbols {
            entry_offset: 2,
            ..SYMBOLS
        };
        let err = compose_boot_sector(&[], &stage1(), symbols, Stage2Location::new(1, 1).unwrap())
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidStage1(_)));
    }

    #[test]
    fn rejects_truncated_patch_field() {
        let symbols = BootSymbols {
            stage2_location_offset: 508,
            ..SYMBOLS
        };
        let err = compose_boot_sector(&[], &stage1(), symbols, Stage2Location::new(1, 1).unwrap())
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidStage1(_)));
    }

    #[test]
    fn rejects_patch_field_past_address_space() {
        let symbols = BootSymbols {
            stage2_location_offset: usize::MAX - 2,
            ..SYMBOLS
        };
        let err = compose_boot_sector(&[], &stage1(), symbols, Stage2Location::new(1, 1).unwrap())
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidStage1(_)));
    }

    #[test]
    fn far_symbol_with_low_load_address() {
        let map = LinkMap::parse(
            std::path::Path::new("stage1.map"),
            "0x3e __entry_start\n0xfffffffffffffffd stage2_location\n",
        );
        let location = Stage2Location::new(1, 1).unwrap();

        let err = BootSymbols::resolve(&map, 0)
            .and_then(|symbols| compose_boot_sector(&[], &stage1(), symbols, location))
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidStage1(_)));
    }

    #[test]
    fn symbols_relative_to_load_address() {
        let map = LinkMap::parse(
            std::path::Path::new("stage1.map"),
            "0x7c3e __entry_start\n0x7db0 stage2_location\n",
        );

        assert_eq!(
            BootSymbols::resolve(&map, BOOT_LOAD_ADDRESS).unwrap(),
            BootSymbols {
                entry_offset: 0x3e,
                stage2_location_offset: 0x1b0,
            }
        );
    }

    #[test]
    fn symbol_below_load_address() {
        let map = LinkMap::parse(
            std::path::Path::new("stage1.map"),
            "0x0600 __entry_start\n0x7db0 stage2_location\n",
        );

        assert!(matches!(
            BootSymbols::resolve(&map, BOOT_LOAD_ADDRESS),
            Err(BuildError::InvalidStage1(_))
        ));
    }

    proptest! {
        #[test]
        fn stage1_bytes_survive_outside_patch_fields(
            stage1 in proptest::collection::vec(any::<u8>(), 64..=512),
            formatted in proptest::collection::vec(any::<u8>(), 512),
            entry_seed in any::<usize>(),
            patch_seed in any::<usize>(),
            start in any::<u32>(),
            sectors in 1u64..=255,
        ) {
            let entry = JUMP_LEN + entry_seed % (stage1.len() - JUMP_LEN);
            let patch = patch_seed % (stage1.len() - PATCH_LEN + 1);
            let symbols = BootSymbols { entry_offset: entry, stage2_location_offset: patch };
            let location = Stage2Location::new(u64::from(start), sectors).unwrap();

            let sector = compose_boot_sector(&formatted, &stage1, symbols, location).unwrap();

            prop_assert_eq!(sector.len(), stage1.len());
            prop_assert_eq!(u64::from(sector[patch + 4]), sectors);
            prop_assert_eq!(&sector[patch..patch + 4], &start.to_le_bytes()[..]);
            for (i, byte) in sector.iter().enumerate() {
                let patched = (patch..patch + PATCH_LEN).contains(&i);
                if patched {
                    continue;
                }
                if i < JUMP_LEN || i >= entry {
                    prop_assert_eq!(*byte, stage1[i]);
                } else {
                    prop_assert_eq!(*byte, formatted[i]);
                }
            }
        }
    }
}
