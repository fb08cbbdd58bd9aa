//! ext3 volume access through `debugfs`.
//!
//! Every operation runs one `debugfs -w` session, fed its requests on standard input. The
//! volume is addressed as `image?offset=N` when it lives inside a partition. `debugfs` exits
//! successfully even when a request fails, failures are read back from its error output.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use crate::components::tool::run_tool_with_input;
use crate::errors::BuildError;
use crate::fs::copy::{TreeCopier, VolumePath, VolumeTarget};
use crate::settings::ToolSettings;

/// [`TreeCopier`] driving `debugfs`.
#[derive(Debug)]
pub struct DebugfsCopier {
    program: String,
    device: String,
}

impl DebugfsCopier {
    pub fn new(tools: &ToolSettings, target: &VolumeTarget) -> Self {
        Self {
            program: tools.debugfs.clone(),
            device: Self::device(&target.image, target.byte_offset),
        }
    }

    /// Device name of the volume starting `byte_offset` bytes in `image`.
    pub fn device(image: &Path, byte_offset: u64) -> String {
        match byte_offset {
            0 => image.display().to_string(),
            offset => format!("{}?offset={offset}", image.display()),
        }
    }

    /// Requests creating `path`.
    pub fn mkdir_requests(path: &VolumePath) -> String {
        format!("mkdir {}\n", quote(path.as_str()))
    }

    /// Requests copying `source` to `target`.
    pub fn write_requests(source: &Path, target: &VolumePath) -> String {
        let parent = target.parent().unwrap_or_else(VolumePath::root);

        format!(
            "cd {}\nwrite {} {}\n",
            quote(parent.as_str()),
            quote(&source.display().to_string()),
            quote(target.file_name())
        )
    }

    async fn run(&self, requests: &str) -> Result<Output, BuildError> {
        run_tool_with_input(
            &self.program,
            Command::new(&self.program).args(["-w", "-f", "-", self.device.as_str()]),
            requests,
        )
        .await
    }

    fn failure(&self, output: &Output) -> Option<BuildError> {
        let errors = request_errors(output);

        if errors.is_empty() {
            return None;
        }

        Some(BuildError::Tool {
            tool: self.program.clone(),
            status: output.status.code(),
            output: errors,
        })
    }
}

#[async_trait]
impl TreeCopier for DebugfsCopier {
    async fn make_dir(&mut self, path: &VolumePath) -> Result<(), BuildError> {
        let output = self.run(&Self::mkdir_requests(path)).await?;

        match self.failure(&output) {
            Some(err) if err.tool_output().is_some_and(|out| out.contains("already exists")) => {
                Err(BuildError::DirectoryExists(path.to_string()))
            }
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn copy_file(&mut self, source: &Path, target: &VolumePath) -> Result<(), BuildError> {
        let output = self.run(&Self::write_requests(source, target)).await?;

        match self.failure(&output) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Error lines printed by `debugfs`, version banner excluded.
fn request_errors(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("debugfs "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn quote(arg: &str) -> String {
    format!("\"{}\"", arg.replace('"', "\\\""))
}
