//! Copy of the kernel and auxiliary files into a provisioned filesystem.
//!
//! Files are copied through a [`TreeCopier`], opened by a [`CopierProvider`] on a
//! [`VolumeTarget`]. The layout of the copied tree only depends on the inputs, whether the
//! filesystem spans the whole image or sits inside a partition.

use std::collections::HashSet;
use std::fmt::Display;
use std::fs;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info};

use crate::errors::BuildError;
use crate::fs::debugfs::DebugfsCopier;
use crate::fs::mtools::MtoolsCopier;
use crate::fs::FsKind;
use crate::settings::ToolSettings;

/// Absolute, `/` separated path inside a filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumePath(String);

impl VolumePath {
    pub fn root() -> Self {
        Self(String::from("/"))
    }

    /// Returns the path of `name` inside this directory.
    ///
    /// `name` may hold several `/` separated components, empty ones are ignored.
    pub fn join(&self, name: &str) -> Self {
        let mut path = self.0.clone();

        for part in name.split('/').filter(|part| !part.is_empty()) {
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(part);
        }

        Self(path)
    }

    /// Converts a path relative to the base directory into a volume path.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use fzimage::fs::copy::VolumePath;
    ///
    /// let path = VolumePath::from_relative(Path::new("docs/readme.txt")).unwrap();
    /// assert_eq!(path.as_str(), "/docs/readme.txt");
    /// assert!(VolumePath::from_relative(Path::new("../secret")).is_err());
    /// ```
    pub fn from_relative(relative: &Path) -> Result<Self, BuildError> {
        let mut path = Self::root();

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        BuildError::Config(format!("{} is not valid UTF-8", relative.display()))
                    })?;
                    path = path.join(part);
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(BuildError::Config(format!(
                        "{} must be relative to the base directory",
                        relative.display()
                    )));
                }
            }
        }

        Ok(path)
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// Returns every directory containing this path, outermost first, the root excluded.
    pub fn ancestors(&self) -> Vec<Self> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();

        while let Some(dir) = current {
            if dir.is_root() {
                break;
            }
            current = dir.parent();
            ancestors.push(dir);
        }

        ancestors.reverse();
        ancestors
    }

    /// Last component of the path, empty for the root.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VolumePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A file or directory to reproduce in the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub source: PathBuf,
    pub target: VolumePath,
    pub kind: EntryKind,
}

/// Expands the `files` list, relative to `base_dir`, into the entries to copy.
///
/// Directories are walked recursively; their content is sorted by name and every directory
/// comes before what it contains.
pub fn collect_entries(base_dir: &Path, files: &[PathBuf]) -> Result<Vec<TreeEntry>, BuildError> {
    let mut entries = Vec::new();

    for file in files {
        let target = VolumePath::from_relative(file)?;
        if target.is_root() {
            return Err(BuildError::Config(format!(
                "{} does not name a file below the base directory",
                file.display()
            )));
        }

        collect_into(&base_dir.join(file), target, &mut entries)?;
    }

    Ok(entries)
}

fn collect_into(
    source: &Path,
    target: VolumePath,
    entries: &mut Vec<TreeEntry>,
) -> Result<(), BuildError> {
    let metadata = fs::metadata(source).map_err(BuildError::io(source))?;

    if !metadata.is_dir() {
        entries.push(TreeEntry {
            source: source.to_path_buf(),
            target,
            kind: EntryKind::File,
        });
        return Ok(());
    }

    entries.push(TreeEntry {
        source: source.to_path_buf(),
        target: target.clone(),
        kind: EntryKind::Directory,
    });

    let mut children = fs::read_dir(source)
        .map_err(BuildError::io(source))?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(BuildError::io(source))?;
    children.sort();

    for name in children {
        let name_str = name.to_str().ok_or_else(|| {
            BuildError::Config(format!(
                "{} is not valid UTF-8",
                source.join(&name).display()
            ))
        })?;
        collect_into(&source.join(&name), target.join(name_str), entries)?;
    }

    Ok(())
}

/// Where a filesystem lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeTarget {
    pub image: PathBuf,

    /// Offset of the filesystem in the image, 0 when it spans the whole image.
    pub byte_offset: u64,
}

impl VolumeTarget {
    pub fn is_whole_image(&self) -> bool {
        self.byte_offset == 0
    }
}

/// A session writing files into one filesystem.
#[async_trait]
pub trait TreeCopier: Send {
    /// Creates the directory `path`, its parent must exist.
    ///
    /// Fails with [`BuildError::DirectoryExists`] if the directory is already present.
    async fn make_dir(&mut self, path: &VolumePath) -> Result<(), BuildError>;

    /// Copies the host file `source` to `target`.
    async fn copy_file(&mut self, source: &Path, target: &VolumePath) -> Result<(), BuildError>;
}

/// Opens [`TreeCopier`] sessions.
pub trait CopierProvider: Send + Sync {
    fn open(&self, kind: FsKind, target: &VolumeTarget)
        -> Result<Box<dyn TreeCopier>, BuildError>;
}

/// Opens `mtools` sessions on FAT volumes and `debugfs` sessions on ext3 ones.
#[derive(Debug, Clone)]
pub struct SystemCopierProvider {
    tools: ToolSettings,
}

impl SystemCopierProvider {
    pub fn new(tools: &ToolSettings) -> Self {
        Self {
            tools: tools.clone(),
        }
    }
}

impl CopierProvider for SystemCopierProvider {
    fn open(
        &self,
        kind: FsKind,
        target: &VolumeTarget,
    ) -> Result<Box<dyn TreeCopier>, BuildError> {
        if kind.is_fat() {
            Ok(Box::new(MtoolsCopier::open(&self.tools, target)?))
        } else {
            Ok(Box::new(DebugfsCopier::new(&self.tools, target)))
        }
    }
}

/// Tracks the directories known to exist during a [`populate`] run.
struct DirCache<'a> {
    copier: &'a mut dyn TreeCopier,
    created: HashSet<VolumePath>,
}

impl DirCache<'_> {
    /// Creates `dir` and its ancestors when not already done.
    async fn ensure(&mut self, dir: &VolumePath) -> Result<(), BuildError> {
        let mut chain = dir.ancestors();
        chain.push(dir.clone());

        for dir in chain {
            if dir.is_root() || self.created.contains(&dir) {
                continue;
            }

            match self.copier.make_dir(&dir).await {
                Ok(()) => debug!(target: "copy", "created {dir}"),
                Err(err) if err.is_directory_exists() => {
                    debug!(target: "copy", "{dir} already exists")
                }
                Err(err) => return Err(err),
            }

            self.created.insert(dir);
        }

        Ok(())
    }

    async fn copy(&mut self, source: &Path, target: &VolumePath) -> Result<(), BuildError> {
        if let Some(parent) = target.parent() {
            self.ensure(&parent).await?;
        }

        self.copier.copy_file(source, target).await?;
        debug!(target: "copy", "{} -> {target}", source.display());

        Ok(())
    }
}

/// Copies `kernel` into `boot_dir`, then every entry, through `copier`.
///
/// Returns the number of copied files.
pub async fn populate(
    copier: &mut dyn TreeCopier,
    kernel: &Path,
    boot_dir: &VolumePath,
    entries: &[TreeEntry],
) -> Result<usize, BuildError> {
    let kernel_name = kernel
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            BuildError::Config(format!("invalid kernel path {}", kernel.display()))
        })?;

    let mut dirs = DirCache {
        copier,
        created: HashSet::new(),
    };

    dirs.ensure(boot_dir).await?;
    dirs.copy(kernel, &boot_dir.join(kernel_name)).await?;
    let mut copied = 1;

    for entry in entries {
        match entry.kind {
            EntryKind::Directory => dirs.ensure(&entry.target).await?,
            EntryKind::File => {
                dirs.copy(&entry.source, &entry.target).await?;
                copied += 1;
            }
        }
    }

    info!(target: "copy", "copied {copied} files, kernel in {boot_dir}");

    Ok(copied)
}
