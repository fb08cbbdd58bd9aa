//! Filesystem formatting.

use std::path::Path;

use async_trait::async_trait;
use log::info;
use tokio::process::Command;

use crate::components::tool::run_tool;
use crate::errors::BuildError;
use crate::fs::{FsKind, VolumeSpec};
use crate::settings::ToolSettings;

/// Creates filesystems inside images.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Formatter: Send + Sync {
    /// Formats the volume described by `volume` inside the image at `image`.
    async fn format(&self, image: &Path, volume: &VolumeSpec) -> Result<(), BuildError>;
}

/// Formats through `mkfs.fat` and `mkfs.ext3`.
#[derive(Debug, Clone)]
pub struct MkfsFormatter {
    tools: ToolSettings,
}

impl MkfsFormatter {
    pub fn new(tools: &ToolSettings) -> Self {
        Self {
            tools: tools.clone(),
        }
    }

    /// Returns the program and arguments formatting `volume`.
    pub fn command_line(&self, image: &Path, volume: &VolumeSpec) -> (String, Vec<String>) {
        let image = image.display().to_string();
        let size_kib = volume.len_bytes() / 1024;

        match volume.kind.fat_bits() {
            Some(bits) => {
                let mut args = vec![
                    String::from("-F"),
                    bits.to_string(),
                    String::from("-n"),
                    volume.label.clone(),
                ];

                if let Some(reserved) = volume.reserved_sectors {
                    args.extend([String::from("-R"), reserved.to_string()]);
                }

                if volume.offset_sectors != 0 {
                    args.extend([
                        String::from("--offset"),
                        volume.offset_sectors.to_string(),
                        String::from("-h"),
                        volume.offset_sectors.to_string(),
                    ]);
                }

                args.extend([image, size_kib.to_string()]);
                (self.tools.mkfs_fat.clone(), args)
            }
            None => {
                let args = vec![
                    String::from("-F"),
                    String::from("-q"),
                    String::from("-L"),
                    volume.label.clone(),
                    String::from("-E"),
                    format!("offset={}", volume.byte_offset()),
                    image,
                    format!("{size_kib}k"),
                ];
                (self.tools.mkfs_ext3.clone(), args)
            }
        }
    }
}

#[async_trait]
impl Formatter for MkfsFormatter {
    async fn format(&self, image: &Path, volume: &VolumeSpec) -> Result<(), BuildError> {
        let (program, args) = self.command_line(image, volume);

        run_tool(&program, Command::new(&program).args(&args)).await?;

        info!(
            target: "format",
            "{} volume at sector {} ({} sectors{})",
            volume.kind,
            volume.offset_sectors,
            volume.sectors,
            match volume.reserved_sectors {
                Some(reserved) => format!(", {reserved} reserved"),
                None => String::new(),
            }
        );

        Ok(())
    }
}

impl FsKind {
    /// Whether `volume` can be formatted by this crate's formatters.
    pub fn check_volume(&self, volume: &VolumeSpec) -> Result<(), BuildError> {
        if self.is_fat() && volume.reserved_sectors.is_none() {
            return Err(BuildError::Config(format!(
                "{self} volume without reserved sectors count"
            )));
        }

        if volume.len_bytes() < 1024 {
            return Err(BuildError::Layout(format!(
                "{self} volume of {} sectors is too small",
                volume.sectors
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(kind: FsKind, reserved: Option<u16>, offset: u64, sectors: u64) -> VolumeSpec {
        VolumeSpec {
            kind,
            label: String::from("NBOS"),
            reserved_sectors: reserved,
            offset_sectors: offset,
            sectors,
        }
    }

    #[test]
    fn floppy_command_line() {
        let formatter = MkfsFormatter::new(&ToolSettings::default());
        let (program, args) =
            formatter.command_line(Path::new("floppy.img"), &volume(FsKind::Fat12, Some(4), 0, 2880));

        assert_eq!(program, "mkfs.fat");
        assert_eq!(
            args,
            ["-F", "12", "-n", "NBOS", "-R", "4", "floppy.img", "1440"]
        );
    }

    #[test]
    fn partition_command_line() {
        let formatter = MkfsFormatter::new(&ToolSettings::default());
        let (_, args) = formatter.command_line(
            Path::new("disk.img"),
            &volume(FsKind::Fat32, Some(4), 2048, 30720),
        );

        assert_eq!(
            args,
            [
                "-F", "32", "-n", "NBOS", "-R", "4", "--offset", "2048", "-h", "2048", "disk.img",
                "15360"
            ]
        );
    }

    #[test]
    fn journaling_command_line() {
        let formatter = MkfsFormatter::new(&ToolSettings::default());
        let (program, args) =
            formatter.command_line(Path::new("disk.img"), &volume(FsKind::Ext3, None, 2048, 30720));

        assert_eq!(program, "mkfs.ext3");
        assert_eq!(
            args,
            ["-F", "-q", "-L", "NBOS", "-E", "offset=1048576", "disk.img", "15360k"]
        );
    }

    #[test]
    fn fat_needs_reserved_count() {
        assert!(FsKind::Fat16
            .check_volume(&volume(FsKind::Fat16, None, 0, 2880))
            .is_err());
        assert!(FsKind::Ext3
            .check_volume(&volume(FsKind::Ext3, None, 2048, 2048))
            .is_ok());
    }

    #[tokio::test]
    async fn tool_failure_is_fatal() {
        let tools = ToolSettings {
            mkfs_fat: String::from("false"),
            ..ToolSettings::default()
        };

        let err = MkfsFormatter::new(&tools)
            .format(Path::new("disk.img"), &volume(FsKind::Fat12, Some(2), 0, 2880))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Tool { status: Some(1), .. }));
    }
}
