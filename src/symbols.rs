//! Symbol lookup in the link map produced alongside the stage1 binary.
//!
//! Lookup is substring based: the first line that contains the symbol name and a `0x...`
//! literal wins. A symbol whose name is contained in another symbol's name (`stage2` vs.
//! `stage2_location`) resolves to whichever line comes first, so boot sector symbols must use
//! names that do not collide.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;

use crate::errors::BuildError;

/// Linker map of a stage1 build.
#[derive(Debug, Clone)]
pub struct LinkMap {
    source: PathBuf,
    lines: Vec<String>,
}

impl LinkMap {
    /// Returns the path of the link map emitted next to `stage1` (same name, `.map` extension).
    pub fn map_path_for(stage1: &Path) -> PathBuf {
        stage1.with_extension("map")
    }

    /// Loads the link map at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingMap`] if there is no such file.
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        if !path.is_file() {
            return Err(BuildError::MissingMap(path.to_path_buf()));
        }

        let text = fs::read_to_string(path).map_err(BuildError::io(path))?;

        Ok(Self::parse(path, &text))
    }

    /// Builds a link map from its text, `source` is only used in error messages.
    pub fn parse(source: &Path, text: &str) -> Self {
        Self {
            source: source.to_path_buf(),
            lines: text.lines().map(String::from).collect(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Returns the address of `symbol`.
    ///
    /// Lines mentioning the symbol without a parsable hexadecimal literal are skipped.
    ///
    /// # Examples
    ///
    /// ```
    /// use fzimage::symbols::LinkMap;
    /// use std::path::Path;
    ///
    /// let map = LinkMap::parse(
    ///     Path::new("stage1.map"),
    ///     "                0x0000000000007c3e                __entry_start = .\n",
    /// );
    /// assert_eq!(map.resolve("__entry_start").unwrap(), 0x7c3e);
    /// ```
    pub fn resolve(&self, symbol: &str) -> Result<u64, BuildError> {
        let hex = Regex::new("0x([0-9a-fA-F]+)")
            .map_err(|err| BuildError::Config(format!("address pattern: {err}")))?;

        let address = self
            .lines
            .iter()
            .filter(|line| line.contains(symbol))
            .find_map(|line| {
                let digits = hex.captures(line)?.get(1)?.as_str();
                u64::from_str_radix(digits, 16).ok()
            })
            .ok_or_else(|| BuildError::MissingSymbol {
                symbol: String::from(symbol),
                map: self.source.clone(),
            })?;

        debug!(target: "symbols", "{symbol} = {address:#x}");

        Ok(address)
    }
}
