//! FAT volume access through `mtools`.
//!
//! A volume spanning the whole image is addressed with `-i <image>`. A volume inside a
//! partition is mapped to drive `x:` by a configuration file handed to the tools through
//! `MTOOLSRC`, which lives as long as the copier session.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::components::tool::run_tool;
use crate::errors::BuildError;
use crate::fs::copy::{TreeCopier, VolumePath, VolumeTarget};
use crate::settings::ToolSettings;

/// Drive letter mapped to partitioned volumes.
pub const DRIVE_LETTER: char = 'x';

/// Drive mapping configuration file, removed when dropped.
#[derive(Debug)]
pub struct DriveConfig {
    path: PathBuf,
}

impl DriveConfig {
    /// Location of the configuration file of `image`.
    pub fn path_for(image: &Path) -> PathBuf {
        let mut path = image.as_os_str().to_owned();
        path.push(".mtools.conf");
        PathBuf::from(path)
    }

    /// Writes a configuration mapping [`DRIVE_LETTER`] to `image`, starting `byte_offset`
    /// bytes in.
    pub fn create(image: &Path, byte_offset: u64) -> Result<Self, BuildError> {
        let absolute = fs::canonicalize(image).map_err(BuildError::io(image))?;
        let path = Self::path_for(image);
        let content = format!(
            "drive {DRIVE_LETTER}: file=\"{}\" offset={byte_offset}\n",
            absolute.display()
        );

        fs::write(&path, content).map_err(BuildError::io(&path))?;
        debug!(target: "mtools", "mapped {DRIVE_LETTER}: in {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DriveConfig {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!(target: "mtools", "failed to remove {}: {err}", self.path.display());
        }
    }
}

/// [`TreeCopier`] driving `mmd`, `mcopy` and `mdir`.
#[derive(Debug)]
pub struct MtoolsCopier {
    tools: ToolSettings,
    image: PathBuf,
    drive: Option<DriveConfig>,
}

impl MtoolsCopier {
    /// Opens a session on the FAT volume of `target`.
    pub fn open(tools: &ToolSettings, target: &VolumeTarget) -> Result<Self, BuildError> {
        let drive = if target.is_whole_image() {
            None
        } else {
            Some(DriveConfig::create(&target.image, target.byte_offset)?)
        };

        Ok(Self {
            tools: tools.clone(),
            image: target.image.clone(),
            drive,
        })
    }

    /// Drive mapping of this session, if the volume is inside a partition.
    pub fn drive(&self) -> Option<&DriveConfig> {
        self.drive.as_ref()
    }

    /// Name of `path` as understood by the tools.
    pub fn target_arg(&self, path: &VolumePath) -> String {
        match self.drive {
            Some(_) => format!("{DRIVE_LETTER}:{path}"),
            None => format!("::{path}"),
        }
    }

    /// Base command for `program`, addressing this session's volume.
    pub fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("MTOOLS_SKIP_CHECK", "1");

        match &self.drive {
            Some(drive) => {
                cmd.env("MTOOLSRC", drive.path());
            }
            None => {
                cmd.arg("-i").arg(&self.image);
            }
        }

        cmd
    }
}

#[async_trait]
impl TreeCopier for MtoolsCopier {
    async fn make_dir(&mut self, path: &VolumePath) -> Result<(), BuildError> {
        let target = self.target_arg(path);
        let created = run_tool(&self.tools.mmd, self.command(&self.tools.mmd).arg(&target)).await;

        match created {
            Ok(_) => Ok(()),
            Err(err @ BuildError::Tool { .. }) => {
                // mmd fails on existing directories, tell them apart from real failures
                let listed = run_tool(
                    &self.tools.mdir,
                    self.command(&self.tools.mdir).arg("-b").arg(&target),
                )
                .await;

                match listed {
                    Ok(_) => Err(BuildError::DirectoryExists(path.to_string())),
                    Err(_) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn copy_file(&mut self, source: &Path, target: &VolumePath) -> Result<(), BuildError> {
        run_tool(
            &self.tools.mcopy,
            self.command(&self.tools.mcopy)
                .arg("-o")
                .arg(source)
                .arg(self.target_arg(target)),
        )
        .await?;

        Ok(())
    }
}
