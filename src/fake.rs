//! In-memory stand-ins for the external tools.
//!
//! They let the whole assembly run without `mkfs`, `mtools` or `debugfs` installed, while
//! recording what they were asked to do. Clones share their state.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::BuildError;
use crate::fs::copy::{CopierProvider, TreeCopier, VolumePath, VolumeTarget};
use crate::fs::fat::{BootSectorHeader, BOOT_SIGNATURE_OFFSET};
use crate::fs::format::Formatter;
use crate::fs::partitions::{Partition, PartitionTableWriter};
use crate::fs::{FsKind, VolumeSpec};
use crate::image::Image;

static SCRATCH_ID: AtomicUsize = AtomicUsize::new(0);

/// Offset of the entry point of the stage1 written by [`write_stage1`].
pub const STAGE1_ENTRY_OFFSET: usize = 0x3E;

/// Offset of the stage2 location fields of the stage1 written by [`write_stage1`].
pub const STAGE1_LOCATION_OFFSET: usize = 0x1B0;

/// Offset of the partition table area in a boot sector.
const PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// Writes a 512-byte stage1 binary named `stage1.bin` and its link map in `dir`.
///
/// Like a real boot sector, its partition table area (`0x1BE..0x1FE`) is left empty.
///
/// Returns the path of the binary.
pub fn write_stage1(dir: &Path) -> Result<PathBuf, BuildError> {
    let mut stage1: Vec<u8> = (0..512).map(|i| (i * 7 + 3) as u8).collect();
    stage1[..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    stage1[PARTITION_TABLE_OFFSET..BOOT_SIGNATURE_OFFSET].fill(0);
    stage1[510..].copy_from_slice(&[0x55, 0xAA]);

    let map = format!(
        "Memory Configuration\n\
         \n\
         Linker script and memory map\n\
         \n\
         \x20               0x0000000000007c00                . = 0x7c00\n\
         \x20.text           0x0000000000007c00      0x200\n\
         \x20               0x{:016x}                __entry_start\n\
         \x20               0x{:016x}                stage2_location\n",
        0x7C00 + STAGE1_ENTRY_OFFSET,
        0x7C00 + STAGE1_LOCATION_OFFSET,
    );

    let path = dir.join("stage1.bin");
    fs::write(&path, &stage1).map_err(BuildError::io(&path))?;
    let map_path = path.with_extension("map");
    fs::write(&map_path, map).map_err(BuildError::io(&map_path))?;

    Ok(path)
}

/// Temporary directory, removed with its content when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates a fresh directory under the system temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory can't be created.
    pub fn new(name: &str) -> Self {
        let id = SCRATCH_ID.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "fzimage-{name}-{}-{id}",
            std::process::id()
        ));

        if path.exists() {
            let _ = fs::remove_dir_all(&path);
        }
        fs::create_dir_all(&path)
            .unwrap_or_else(|err| panic!("can't create {}: {err}", path.display()));

        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Records committed partitions instead of writing a table.
#[derive(Debug, Clone, Default)]
pub struct MemoryPartitionWriter {
    committed: Arc<Mutex<Vec<Partition>>>,
}

impl MemoryPartitionWriter {
    pub fn committed(&self) -> Vec<Partition> {
        self.committed.lock().clone()
    }
}

#[async_trait]
impl PartitionTableWriter for MemoryPartitionWriter {
    async fn commit(&self, _image: &Image, partition: &Partition) -> Result<(), BuildError> {
        self.committed.lock().push(*partition);
        Ok(())
    }
}

/// Writes a bare FAT boot sector where a formatter would, and records the requests.
#[derive(Debug, Clone, Default)]
pub struct FakeFormatter {
    volumes: Arc<Mutex<Vec<VolumeSpec>>>,

    /// Reserved sectors count written instead of the requested one.
    reserved_override: Option<u16>,
}

impl FakeFormatter {
    /// A formatter ignoring the requested reserved sectors count.
    pub fn reserving(reserved: u16) -> Self {
        Self {
            reserved_override: Some(reserved),
            ..Self::default()
        }
    }

    pub fn formatted(&self) -> Vec<VolumeSpec> {
        self.volumes.lock().clone()
    }
}

#[async_trait]
impl Formatter for FakeFormatter {
    async fn format(&self, image: &Path, volume: &VolumeSpec) -> Result<(), BuildError> {
        self.volumes.lock().push(volume.clone());

        if !volume.kind.is_fat() {
            return Ok(());
        }

        let image = Image::open(image)?;
        let reserved = self
            .reserved_override
            .or(volume.reserved_sectors)
            .unwrap_or(1);
        let header = BootSectorHeader::new(
            *b"mkfs.fat",
            reserved,
            u32::try_from(volume.offset_sectors).unwrap_or(u32::MAX),
            u32::try_from(volume.sectors).unwrap_or(u32::MAX),
        );

        image.write_at(volume.byte_offset(), header.as_bytes())?;
        image.write_at(
            volume.byte_offset() + BOOT_SIGNATURE_OFFSET as u64,
            &[0x55, 0xAA],
        )?;

        Ok(())
    }
}

/// Content of one in-memory filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryVolume {
    kind: Option<FsKind>,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    failing: HashSet<String>,
    make_dir_calls: usize,
    sessions: usize,
}

impl MemoryVolume {
    pub fn kind(&self) -> Option<FsKind> {
        self.kind
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }

    /// Every directory and file path, sorted, directories suffixed with `/`.
    pub fn tree(&self) -> Vec<String> {
        let mut tree: Vec<String> = self
            .dirs
            .iter()
            .map(|dir| format!("{dir}/"))
            .chain(self.files.keys().cloned())
            .collect();
        tree.sort();
        tree
    }

    pub fn make_dir_calls(&self) -> usize {
        self.make_dir_calls
    }

    /// Number of sessions opened on this volume.
    pub fn sessions(&self) -> usize {
        self.sessions
    }
}

type Volumes = Arc<Mutex<HashMap<VolumeTarget, MemoryVolume>>>;

/// Opens [`MemoryCopier`] sessions, one in-memory filesystem per [`VolumeTarget`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCopierProvider {
    volumes: Volumes,
}

impl MemoryCopierProvider {
    /// Snapshot of the filesystem at `target`.
    pub fn volume(&self, target: &VolumeTarget) -> Option<MemoryVolume> {
        self.volumes.lock().get(target).cloned()
    }

    pub fn targets(&self) -> Vec<VolumeTarget> {
        self.volumes.lock().keys().cloned().collect()
    }

    /// Makes `path` exist before any session.
    pub fn preload_dir(&self, target: &VolumeTarget, path: &str) {
        self.volumes
            .lock()
            .entry(target.clone())
            .or_default()
            .dirs
            .insert(path.to_string());
    }

    /// Makes every creation of `path` fail.
    pub fn fail_make_dir(&self, target: &VolumeTarget, path: &str) {
        self.volumes
            .lock()
            .entry(target.clone())
            .or_default()
            .failing
            .insert(path.to_string());
    }
}

impl CopierProvider for MemoryCopierProvider {
    fn open(
        &self,
        kind: FsKind,
        target: &VolumeTarget,
    ) -> Result<Box<dyn TreeCopier>, BuildError> {
        {
            let mut volumes = self.volumes.lock();
            let volume = volumes.entry(target.clone()).or_default();
            volume.kind = Some(kind);
            volume.sessions += 1;
        }

        Ok(Box::new(MemoryCopier {
            target: target.clone(),
            volumes: self.volumes.clone(),
        }))
    }
}

/// [`TreeCopier`] writing into a [`MemoryCopierProvider`].
#[derive(Debug)]
pub struct MemoryCopier {
    target: VolumeTarget,
    volumes: Volumes,
}

impl MemoryCopier {
    fn missing_parent(path: &VolumePath) -> BuildError {
        BuildError::Tool {
            tool: String::from("memory"),
            status: Some(1),
            output: format!("parent directory of {path} does not exist"),
        }
    }
}

#[async_trait]
impl TreeCopier for MemoryCopier {
    async fn make_dir(&mut self, path: &VolumePath) -> Result<(), BuildError> {
        let mut volumes = self.volumes.lock();
        let volume = volumes.entry(self.target.clone()).or_default();
        volume.make_dir_calls += 1;

        if volume.failing.contains(path.as_str()) {
            return Err(BuildError::Tool {
                tool: String::from("memory"),
                status: Some(1),
                output: format!("cannot create {path}"),
            });
        }

        if volume.has_dir(path.as_str()) {
            return Err(BuildError::DirectoryExists(path.to_string()));
        }

        let parent = path.parent().unwrap_or_else(VolumePath::root);
        if !volume.has_dir(parent.as_str()) {
            return Err(Self::missing_parent(path));
        }

        volume.dirs.insert(path.to_string());
        Ok(())
    }

    async fn copy_file(&mut self, source: &Path, target: &VolumePath) -> Result<(), BuildError> {
        let content = tokio::fs::read(source)
            .await
            .map_err(BuildError::io(source))?;

        let mut volumes = self.volumes.lock();
        let volume = volumes.entry(self.target.clone()).or_default();

        let parent = target.parent().unwrap_or_else(VolumePath::root);
        if !volume.has_dir(parent.as_str()) {
            return Err(Self::missing_parent(target));
        }

        volume.files.insert(target.to_string(), content);
        Ok(())
    }
}
