//! Second stage installation.

use log::info;

use crate::errors::BuildError;
use crate::geometry::sector_to_byte;
use crate::image::Image;

/// Writes `stage2` verbatim at `sector` of `image`.
pub fn install_stage2(image: &Image, sector: u64, stage2: &[u8]) -> Result<(), BuildError> {
    if stage2.is_empty() {
        return Err(BuildError::InvalidStage2(String::from("stage2 is empty")));
    }

    image.write_at(sector_to_byte(sector), stage2)?;

    info!(target: "stage2", "installed {} bytes at sector {sector}", stage2.len());

    Ok(())
}
