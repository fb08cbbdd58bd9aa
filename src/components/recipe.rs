//! Floppy and disk image recipes.
//!
//! Both recipes share the same steps: an image is allocated, partitioned (disks only),
//! formatted, receives stage1 then stage2, and is finally populated with the kernel and the
//! auxiliary files. Every placement is computed by [`ImageLayout::plan`] before the image file
//! is created.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crossbeam::channel::Sender;
use log::{info, warn};

use crate::boot::{install_stage1, install_stage2, Stage2Location};
use crate::components::build::{BuildBlueprint, BuildEvent, BuildResult, BuildState, BuildStep};
use crate::errors::BuildError;
use crate::fs::copy::{
    collect_entries, populate, CopierProvider, SystemCopierProvider, TreeEntry, VolumePath,
    VolumeTarget,
};
use crate::fs::fat::BootSectorHeader;
use crate::fs::format::{Formatter, MkfsFormatter};
use crate::fs::partitions::mbr::MbrTableWriter;
use crate::fs::partitions::{Partition, PartitionTableWriter};
use crate::fs::{FsKind, VolumeSpec};
use crate::geometry::{sectors_for_bytes, STAGE2_SECTOR};
use crate::image::Image;
use crate::settings::Settings;
use crate::symbols::LinkMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// 1.44 MB floppy, FAT12 over the whole image.
    Floppy,

    /// Partitioned disk of `size_bytes` bytes (rounded up to a whole sector).
    Disk { size_bytes: u64, fs: FsKind },
}

/// Everything needed to build one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub kind: ImageKind,
    pub target: PathBuf,
    pub stage1: PathBuf,
    pub stage2: PathBuf,
    pub kernel: PathBuf,

    /// Directory the auxiliary files are relative to.
    pub base_dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Placement of every part of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub image_sectors: u64,
    pub partition: Option<Partition>,
    pub volume: VolumeSpec,
    pub stage2: Stage2Location,
}

impl ImageLayout {
    /// Plans an image of type `kind` hosting a stage2 of `stage2_len` bytes.
    ///
    /// Stage2 always starts at [`STAGE2_SECTOR`]. On floppies it lives in the reserved region
    /// of the FAT volume, on disks in the gap before the partition.
    pub fn plan(kind: &ImageKind, stage2_len: u64, settings: &Settings) -> Result<Self, BuildError> {
        if stage2_len == 0 {
            return Err(BuildError::InvalidStage2(String::from("stage2 is empty")));
        }

        let stage2_sectors = sectors_for_bytes(stage2_len);
        let stage2 = Stage2Location::new(STAGE2_SECTOR, stage2_sectors)?;

        let (image_sectors, fs, partition) = match *kind {
            ImageKind::Floppy => (settings.floppy_sectors, FsKind::Fat12, None),
            ImageKind::Disk { size_bytes, fs } => {
                if size_bytes == 0 {
                    return Err(BuildError::Config(String::from(
                        "disk image size must be positive",
                    )));
                }

                let image_sectors = sectors_for_bytes(size_bytes);
                let partition =
                    Partition::plan(image_sectors, settings.partition_alignment, fs.partition_type())?;

                if STAGE2_SECTOR + stage2_sectors > partition.start_sector {
                    return Err(BuildError::Layout(format!(
                        "stage2 ({stage2_sectors} sectors from sector {STAGE2_SECTOR}) overlaps \
                         the partition starting at sector {}",
                        partition.start_sector
                    )));
                }

                (image_sectors, fs, Some(partition))
            }
        };

        let (offset_sectors, sectors) = match partition {
            Some(partition) => (partition.start_sector, partition.sectors()),
            None => (0, image_sectors),
        };

        let reserved_sectors = match fs.reserved_sectors(stage2_sectors) {
            Some(reserved) if reserved >= sectors => {
                return Err(BuildError::Layout(format!(
                    "{reserved} reserved sectors do not fit in a volume of {sectors} sectors"
                )));
            }
            Some(reserved) => Some(u16::try_from(reserved).map_err(|_| {
                BuildError::Layout(format!("{reserved} reserved sectors exceed the FAT limit"))
            })?),
            None => None,
        };

        let volume = VolumeSpec {
            kind: fs,
            label: settings.volume_label.clone(),
            reserved_sectors,
            offset_sectors,
            sectors,
        };
        fs.check_volume(&volume)?;

        Ok(Self {
            image_sectors,
            partition,
            volume,
            stage2,
        })
    }

    /// Sector receiving stage1: the first sector of the volume.
    pub fn stage1_sector(&self) -> u64 {
        self.volume.offset_sectors
    }

    /// Where the copiers find the filesystem of an image stored at `image`.
    pub fn volume_target(&self, image: &Path) -> VolumeTarget {
        VolumeTarget {
            image: image.to_path_buf(),
            byte_offset: self.volume.byte_offset(),
        }
    }
}

/// External capabilities used by the steps.
pub struct Toolbox {
    pub partitions: Box<dyn PartitionTableWriter>,
    pub formatter: Box<dyn Formatter>,
    pub copiers: Box<dyn CopierProvider>,
}

impl Toolbox {
    /// Toolbox backed by the `gpt` crate and the programs named in `settings`.
    pub fn system(settings: &Settings) -> Self {
        Self {
            partitions: Box::new(MbrTableWriter),
            formatter: Box::new(MkfsFormatter::new(&settings.tools)),
            copiers: Box::new(SystemCopierProvider::new(&settings.tools)),
        }
    }
}

/// An allocated image, with everything the steps need to fill it.
pub struct Assembly<'a> {
    request: &'a ImageRequest,
    settings: &'a Settings,
    toolbox: &'a Toolbox,
    layout: ImageLayout,
    stage2: Vec<u8>,
    entries: Vec<TreeEntry>,
    image: Image,
}

impl<'a> Assembly<'a> {
    /// Checks the request, plans the image, and allocates it.
    ///
    /// Every error that can be detected from the inputs is raised before the image file is
    /// created.
    pub fn prepare(
        request: &'a ImageRequest,
        settings: &'a Settings,
        toolbox: &'a Toolbox,
    ) -> Result<Self, BuildError> {
        settings.validate()?;

        let stage2 = fs::read(&request.stage2).map_err(BuildError::io(&request.stage2))?;
        let layout = ImageLayout::plan(&request.kind, stage2.len() as u64, settings)?;

        let kernel = fs::metadata(&request.kernel).map_err(BuildError::io(&request.kernel))?;
        if !kernel.is_file() {
            return Err(BuildError::Config(format!(
                "kernel {} is not a file",
                request.kernel.display()
            )));
        }

        let entries = collect_entries(&request.base_dir, &request.files)?;

        let image = Image::allocate(&request.target, layout.image_sectors)?;
        info!(
            target: "recipe",
            "{} ({} sectors, {})",
            request.target.display(),
            layout.image_sectors,
            layout.volume.kind
        );

        Ok(Self {
            request,
            settings,
            toolbox,
            layout,
            stage2,
            entries,
            image,
        })
    }

    /// Blueprint of the steps building this image.
    pub fn blueprint(&self) -> BuildBlueprint {
        let mut blueprint = BuildBlueprint::default();

        if self.layout.partition.is_some() {
            blueprint.add_step(PartitionStep);
        }
        blueprint.add_step(FormatStep);
        blueprint.add_step(Stage1Step);
        blueprint.add_step(Stage2Step);
        blueprint.add_step(PopulateStep);

        blueprint
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn request(&self) -> &ImageRequest {
        self.request
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }
}

/// Builds the image described by `request`.
pub async fn assemble(
    request: &ImageRequest,
    settings: &Settings,
    toolbox: &Toolbox,
) -> Result<ImageLayout, BuildError> {
    let assembly = Assembly::prepare(request, settings, toolbox)?;
    let mut blueprint = assembly.blueprint();

    blueprint.build(&assembly).await?;

    Ok(assembly.layout)
}

struct PartitionStep;

#[async_trait]
impl BuildStep for PartitionStep {
    fn name(&self) -> &str {
        "write partition table"
    }

    fn reaches(&self) -> BuildState {
        BuildState::Partitioned
    }

    async fn build(&self, assembly: &Assembly<'_>, _master: &Sender<BuildEvent>) -> BuildResult {
        let partition = assembly.layout.partition.ok_or_else(|| {
            BuildError::Layout(String::from("image has no partition to write"))
        })?;

        assembly
            .toolbox
            .partitions
            .commit(&assembly.image, &partition)
            .await
    }
}

struct FormatStep;

#[async_trait]
impl BuildStep for FormatStep {
    fn name(&self) -> &str {
        "format filesystem"
    }

    fn reaches(&self) -> BuildState {
        BuildState::Formatted
    }

    async fn build(&self, assembly: &Assembly<'_>, _master: &Sender<BuildEvent>) -> BuildResult {
        let volume = &assembly.layout.volume;

        assembly
            .toolbox
            .formatter
            .format(assembly.image.path(), volume)
            .await?;

        let Some(requested) = volume.reserved_sectors else {
            return Ok(());
        };

        let header = BootSectorHeader::read(&assembly.image, volume.byte_offset())?;
        if header.reserved_sectors() < requested {
            return Err(BuildError::Layout(format!(
                "formatter reserved {} sectors, stage2 needs {requested}",
                header.reserved_sectors()
            )));
        }

        Ok(())
    }
}

struct Stage1Step;

#[async_trait]
impl BuildStep for Stage1Step {
    fn name(&self) -> &str {
        "install stage1"
    }

    fn reaches(&self) -> BuildState {
        BuildState::Stage1Installed
    }

    async fn build(&self, assembly: &Assembly<'_>, _master: &Sender<BuildEvent>) -> BuildResult {
        let path = &assembly.request.stage1;
        let stage1 = tokio::fs::read(path).await.map_err(BuildError::io(path))?;
        let map = LinkMap::load(&LinkMap::map_path_for(path))?;

        install_stage1(
            &assembly.image,
            assembly.layout.stage1_sector(),
            &stage1,
            &map,
            assembly.settings.boot_load_address,
            assembly.layout.stage2,
        )
    }
}

struct Stage2Step;

#[async_trait]
impl BuildStep for Stage2Step {
    fn name(&self) -> &str {
        "install stage2"
    }

    fn reaches(&self) -> BuildState {
        BuildState::Stage2Installed
    }

    async fn build(&self, assembly: &Assembly<'_>, _master: &Sender<BuildEvent>) -> BuildResult {
        install_stage2(
            &assembly.image,
            u64::from(assembly.layout.stage2.start_sector()),
            &assembly.stage2,
        )
    }
}

struct PopulateStep;

#[async_trait]
impl BuildStep for PopulateStep {
    fn name(&self) -> &str {
        "copy files"
    }

    fn reaches(&self) -> BuildState {
        BuildState::Populated
    }

    async fn build(&self, assembly: &Assembly<'_>, master: &Sender<BuildEvent>) -> BuildResult {
        let target = assembly.layout.volume_target(assembly.image.path());
        let boot_dir = VolumePath::root().join(&assembly.settings.boot_directory);

        let mut copier = assembly
            .toolbox
            .copiers
            .open(assembly.layout.volume.kind, &target)?;
        let copied = populate(
            copier.as_mut(),
            &assembly.request.kernel,
            &boot_dir,
            &assembly.entries,
        )
        .await?;

        if copied == 1 && !assembly.request.files.is_empty() {
            warn!(target: "recipe", "no auxiliary file found in the listed directories");
        }

        let _ = master.send(BuildEvent::Update(format!("copied {copied} files")));

        Ok(())
    }
}
