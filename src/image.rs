//! File-backed disk images.

use std::fs;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::BuildError;
use crate::geometry::{sector_to_byte, SECTOR_SIZE};

/// A fixed-length image file, addressed in sectors.
///
/// The length of an `Image` is always a whole number of sectors and never changes once the
/// image was allocated: writes that would extend the file are rejected.
#[derive(Debug, Clone)]
pub struct Image {
    path: PathBuf,
    sectors: u64,
}

impl Image {
    /// Creates (or truncates) the image file at `path`, and sizes it to `sectors` sectors of
    /// zeroes.
    pub fn allocate(path: &Path, sectors: u64) -> Result<Self, BuildError> {
        if sectors == 0 {
            return Err(BuildError::Layout(String::from("image must span at least one sector")));
        }

        let file = fs::File::options()
            .write(true)
            .read(true)
            .truncate(true)
            .create(true)
            .open(path)
            .map_err(BuildError::io(path))?;

        file.set_len(sector_to_byte(sectors))
            .map_err(BuildError::io(path))?;

        debug!(target: "image", "allocated {} ({sectors} sectors)", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            sectors,
        })
    }

    /// Opens an existing image.
    pub fn open(path: &Path) -> Result<Self, BuildError> {
        let len = fs::metadata(path).map_err(BuildError::io(path))?.len();

        if len % SECTOR_SIZE != 0 {
            return Err(BuildError::Layout(format!(
                "{} is not a whole number of sectors ({len} bytes)",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            sectors: len / SECTOR_SIZE,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the image size, in sectors.
    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    /// Returns the image size, in bytes.
    pub fn len_bytes(&self) -> u64 {
        sector_to_byte(self.sectors)
    }

    /// Writes `buf` at `offset` bytes from the start of the image.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), BuildError> {
        self.check_bounds(offset, buf.len())?;

        let file = fs::File::options()
            .write(true)
            .open(&self.path)
            .map_err(BuildError::io(&self.path))?;

        file.write_all_at(buf, offset)
            .map_err(BuildError::io(&self.path))
    }

    /// Reads `len` bytes at `offset` bytes from the start of the image.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, BuildError> {
        self.check_bounds(offset, len)?;

        let file = fs::File::open(&self.path).map_err(BuildError::io(&self.path))?;
        let mut buf = vec![0; len];
        file.read_exact_at(&mut buf, offset)
            .map_err(BuildError::io(&self.path))?;

        Ok(buf)
    }

    fn check_bounds(&self, offset: u64, len: usize) -> Result<(), BuildError> {
        let end = offset.checked_add(len as u64);

        match end {
            Some(end) if end <= self.len_bytes() => Ok(()),
            _ => Err(BuildError::Layout(format!(
                "{len} bytes at offset {offset:#x} overflow {} ({} bytes)",
                self.path.display(),
                self.len_bytes()
            ))),
        }
    }
}
