use std::path::PathBuf;

use argh::FromArgs;
use log::warn;

use crate::components::recipe::{ImageKind, ImageRequest};
use crate::errors::BuildError;
use crate::fs::FsKind;

#[derive(FromArgs, Debug, PartialEq, Eq)]
#[argh(description = "Boot image assembler")]
pub struct App {
    #[argh(positional, description = "type of image to build (floppy or disk)")]
    pub image_type: String,

    #[argh(positional, description = "output image path")]
    pub target_path: PathBuf,

    #[argh(positional, description = "stage1 binary, its link map must sit next to it")]
    pub stage1_path: PathBuf,

    #[argh(positional, description = "stage2 binary")]
    pub stage2_path: PathBuf,

    #[argh(positional, description = "kernel binary, copied to /boot")]
    pub kernel_path: PathBuf,

    #[argh(
        option,
        description = "additional file or directory to copy, relative to the base directory"
    )]
    pub files: Vec<PathBuf>,

    #[argh(
        option,
        default = "PathBuf::from(\".\")",
        description = "directory the additional files are relative to"
    )]
    pub base_dir: PathBuf,

    #[argh(option, description = "disk image size, in bytes")]
    pub image_size: Option<u64>,

    #[argh(option, description = "disk filesystem (fat12, fat16, fat32 or ext3)")]
    pub image_fs: Option<String>,

    #[argh(option, description = "JSON settings file")]
    pub settings: Option<PathBuf>,

    #[argh(switch, short = 'v', description = "display debug messages")]
    pub verbose: bool,
}

impl App {
    /// Parses the process arguments, exiting on `--help` or on invalid arguments.
    ///
    /// Long options may be spelled with underscores (`--base_dir`) or dashes (`--base-dir`).
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let command = args.first().map_or("fzimage", String::as_str);
        let rest = normalize_args(args.iter().skip(1).map(String::as_str));
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();

        Self::from_args(&[command], &rest).unwrap_or_else(|early_exit| {
            std::process::exit(match early_exit.status {
                Ok(()) => {
                    println!("{}", early_exit.output);
                    0
                }
                Err(()) => {
                    eprintln!(
                        "{}\nRun {command} --help for more information.",
                        early_exit.output
                    );
                    1
                }
            })
        })
    }

    /// Validates the arguments into an [`ImageRequest`].
    pub fn into_request(self) -> Result<ImageRequest, BuildError> {
        let kind = match self.image_type.as_str() {
            "floppy" => {
                if self.image_size.is_some() || self.image_fs.is_some() {
                    warn!(target: "cli", "floppy images ignore --image_size and --image_fs");
                }
                ImageKind::Floppy
            }
            "disk" => {
                let (Some(size_bytes), Some(fs)) = (self.image_size, self.image_fs.as_deref())
                else {
                    return Err(BuildError::Config(String::from(
                        "--image_size and --image_fs are required for disk images",
                    )));
                };

                ImageKind::Disk {
                    size_bytes,
                    fs: fs.parse::<FsKind>()?,
                }
            }
            other => {
                return Err(BuildError::Config(format!(
                    "unknown image type {other}, expected floppy or disk"
                )))
            }
        };

        Ok(ImageRequest {
            kind,
            target: self.target_path,
            stage1: self.stage1_path,
            stage2: self.stage2_path,
            kernel: self.kernel_path,
            base_dir: self.base_dir,
            files: self.files,
        })
    }
}

/// Rewrites arguments into the form `argh` expects.
///
/// Underscores in long option names become dashes, and a `--files a b c` list becomes
/// `--files a --files b --files c`. A list ends at the next argument starting with `-`.
pub fn normalize_args<'a>(args: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut options_done = false;
    let mut in_files = false;
    let mut normalized = Vec::new();

    for arg in args {
        if options_done {
            normalized.push(arg.to_string());
            continue;
        }

        if arg == "--" {
            options_done = true;
            in_files = false;
            normalized.push(arg.to_string());
            continue;
        }

        if arg.starts_with('-') {
            let arg = match arg.strip_prefix("--") {
                Some(name) => format!("--{}", name.replace('_', "-")),
                None => arg.to_string(),
            };
            in_files = arg == "--files";
            normalized.push(arg);
            continue;
        }

        if in_files && normalized.last().is_some_and(|last| last != "--files") {
            normalized.push(String::from("--files"));
        }
        normalized.push(arg.to_string());
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<App, argh::EarlyExit> {
        let args = normalize_args(args.iter().copied());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        App::from_args(&["fzimage"], &args)
    }

    #[test]
    fn underscore_options() {
        assert_eq!(
            normalize_args(["--base_dir", "my_dir", "--image-fs", "--", "--odd_name"]),
            ["--base-dir", "my_dir", "--image-fs", "--", "--odd_name"]
        );
    }

    #[test]
    fn files_list() {
        assert_eq!(
            normalize_args(["--files", "readme.txt", "assets", "-v", "--files", "logo.bmp"]),
            [
                "--files",
                "readme.txt",
                "--files",
                "assets",
                "-v",
                "--files",
                "logo.bmp"
            ]
        );

        let app = parse(&[
            "disk",
            "disk.img",
            "stage1.bin",
            "stage2.bin",
            "kernel.elf",
            "--image_size",
            "16777216",
            "--files",
            "readme.txt",
            "assets",
            "fonts/mono.psf",
            "--image_fs",
            "fat16",
        ])
        .unwrap();

        assert_eq!(
            app.files,
            [
                PathBuf::from("readme.txt"),
                PathBuf::from("assets"),
                PathBuf::from("fonts/mono.psf")
            ]
        );
        assert_eq!(app.image_fs.as_deref(), Some("fat16"));
    }

    #[test]
    fn floppy_request() {
        let app = parse(&[
            "floppy",
            "out/floppy.img",
            "stage1.bin",
            "stage2.bin",
            "kernel.elf",
            "--files",
            "readme.txt",
            "--files",
            "assets",
        ])
        .unwrap();

        assert_eq!(app.base_dir, PathBuf::from("."));
        let request = app.into_request().unwrap();
        assert_eq!(request.kind, ImageKind::Floppy);
        assert_eq!(request.target, PathBuf::from("out/floppy.img"));
        assert_eq!(
            request.files,
            [PathBuf::from("readme.txt"), PathBuf::from("assets")]
        );
    }

    #[test]
    fn disk_request() {
        let request = parse(&[
            "disk",
            "disk.img",
            "stage1.bin",
            "stage2.bin",
            "kernel.elf",
            "--image_size",
            "16777216",
            "--image_fs",
            "FAT32",
            "--base_dir",
            "root",
            "-v",
        ])
        .unwrap()
        .into_request()
        .unwrap();

        assert_eq!(
            request.kind,
            ImageKind::Disk {
                size_bytes: 16 * 1024 * 1024,
                fs: FsKind::Fat32
            }
        );
        assert_eq!(request.base_dir, PathBuf::from("root"));
    }

    #[test]
    fn disk_needs_size_and_fs() {
        let app = parse(&[
            "disk", "disk.img", "s1.bin", "s2.bin", "kernel", "--image_fs", "fat16",
        ])
        .unwrap();

        assert!(matches!(app.into_request(), Err(BuildError::Config(_))));
    }

    #[test]
    fn rejected_values() {
        let unknown_fs = parse(&[
            "disk",
            "disk.img",
            "s1.bin",
            "s2.bin",
            "kernel",
            "--image_size",
            "1048576",
            "--image_fs",
            "ntfs",
        ])
        .unwrap();
        assert!(matches!(unknown_fs.into_request(), Err(BuildError::Config(_))));

        let unknown_type = parse(&["cdrom", "a.iso", "s1.bin", "s2.bin", "kernel"]).unwrap();
        assert!(matches!(unknown_type.into_request(), Err(BuildError::Config(_))));

        assert!(parse(&["floppy", "a.img", "s1.bin"]).is_err());
    }

    #[test]
    fn floppy_ignores_disk_options() {
        let request = parse(&[
            "floppy",
            "a.img",
            "s1.bin",
            "s2.bin",
            "kernel",
            "--image_fs",
            "ext3",
        ])
        .unwrap()
        .into_request()
        .unwrap();

        assert_eq!(request.kind, ImageKind::Floppy);
    }
}
