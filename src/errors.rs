use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

/// Broad category of a [`BuildError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid request or settings, detected before the image is touched.
    Configuration,

    /// Symbol lookup in the stage1 link map failed.
    Resolution,

    /// An external tool (formatter, partition writer, copy tool) failed.
    ExternalTool,

    /// Reading a source binary or writing the image failed.
    Io,
}

#[derive(Debug)]
pub enum BuildError {
    /// Unsupported or missing configuration value.
    Config(String),

    /// Placements that cannot fit in the requested image.
    Layout(String),

    /// Stage2 cannot be described by the boot sector patch fields.
    InvalidStage2(String),

    /// The stage1 binary does not match what the patcher expects.
    InvalidStage1(String),

    /// No link map next to the stage1 binary.
    MissingMap(PathBuf),

    /// The link map does not contain the requested symbol.
    MissingSymbol { symbol: String, map: PathBuf },

    /// A directory creation failed because the directory is already present.
    DirectoryExists(String),

    /// The partition table could not be written.
    Partition(String),

    /// An external tool could not be spawned.
    ToolUnavailable { tool: String, source: io::Error },

    /// An external tool exited unsuccessfully.
    Tool {
        tool: String,
        status: Option<i32>,
        output: String,
    },

    Io { path: PathBuf, source: io::Error },
}

impl BuildError {
    /// Returns a closure wrapping an [`io::Error`] raised while accessing `path`.
    ///
    /// Meant to be used with `map_err`:
    ///
    /// ```
    /// use fzimage::errors::BuildError;
    /// use std::path::Path;
    ///
    /// let path = Path::new("/nonexistent/stage2.bin");
    /// let err = std::fs::read(path).map_err(BuildError::io(path)).unwrap_err();
    /// assert!(err.to_string().contains("stage2.bin"));
    /// ```
    pub fn io(path: &Path) -> impl FnOnce(io::Error) -> BuildError + '_ {
        move |source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Layout(_) | Self::InvalidStage2(_) => ErrorKind::Configuration,
            Self::InvalidStage1(_) | Self::MissingMap(_) | Self::MissingSymbol { .. } => {
                ErrorKind::Resolution
            }
            Self::DirectoryExists(_)
            | Self::Partition(_)
            | Self::ToolUnavailable { .. }
            | Self::Tool { .. } => ErrorKind::ExternalTool,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn is_directory_exists(&self) -> bool {
        matches!(self, Self::DirectoryExists(_))
    }

    /// Output captured from the failing tool, if any.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::Tool { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ToolUnavailable { source, .. } | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Layout(msg) => write!(f, "invalid image layout: {msg}"),
            Self::InvalidStage2(msg) => write!(f, "invalid stage2: {msg}"),
            Self::InvalidStage1(msg) => write!(f, "invalid stage1: {msg}"),
            Self::MissingMap(path) => write!(f, "can't find link map {}", path.display()),
            Self::MissingSymbol { symbol, map } => {
                write!(f, "can't find {symbol} symbol in map file {}", map.display())
            }
            Self::DirectoryExists(path) => write!(f, "directory {path} already exists"),
            Self::Partition(msg) => write!(f, "failed to write partition table: {msg}"),
            Self::ToolUnavailable { tool, source } => {
                write!(f, "failed to run {tool}: {source}")
            }
            Self::Tool {
                tool,
                status,
                output,
            } => {
                match status {
                    Some(code) => write!(f, "{tool} exited with status {code}")?,
                    None => write!(f, "{tool} was terminated by a signal")?,
                }
                let output = output.trim();
                if !output.is_empty() {
                    write!(f, ": {output}")?;
                }
                Ok(())
            }
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}
