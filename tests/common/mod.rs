#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use fzimage::components::recipe::{ImageKind, ImageRequest, Toolbox};
use fzimage::fake::{write_stage1, FakeFormatter, MemoryCopierProvider, ScratchDir};
use fzimage::fs::partitions::mbr::MbrTableWriter;

/// Inputs of a build, stored in a scratch directory.
pub struct Workspace {
    pub dir: ScratchDir,
    pub request: ImageRequest,
}

impl Workspace {
    /// Writes a stage1, a stage2 of `stage2_len` bytes and a kernel, plus `readme.txt` and
    /// `assets/` under `root/`.
    pub fn new(name: &str, kind: ImageKind, stage2_len: usize) -> Self {
        let dir = ScratchDir::new(name);
        let base = dir.path();

        let stage1 = write_stage1(base).unwrap();
        let stage2 = base.join("stage2.bin");
        fs::write(&stage2, stage2_pattern(stage2_len)).unwrap();
        let kernel = base.join("kernel.elf");
        fs::write(&kernel, b"\x7fELF\x02\x01\x01 test kernel").unwrap();

        let root = base.join("root");
        fs::create_dir_all(root.join("assets/fonts")).unwrap();
        fs::write(root.join("readme.txt"), b"hello from the image\n").unwrap();
        fs::write(root.join("assets/logo.bmp"), [0x42, 0x4D, 0, 0]).unwrap();
        fs::write(root.join("assets/fonts/mono.psf"), [0x36, 0x04]).unwrap();

        let request = ImageRequest {
            kind,
            target: base.join("out.img"),
            stage1,
            stage2,
            kernel,
            base_dir: root,
            files: vec![PathBuf::from("readme.txt")],
        };

        Self { dir, request }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn stage2_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8 ^ 0x5A).collect()
}

/// Real partition table writer, in-memory formatter and copier.
pub fn fake_toolbox() -> (Toolbox, FakeFormatter, MemoryCopierProvider) {
    let formatter = FakeFormatter::default();
    let copiers = MemoryCopierProvider::default();
    let toolbox = Toolbox {
        partitions: Box::new(MbrTableWriter),
        formatter: Box::new(formatter.clone()),
        copiers: Box::new(copiers.clone()),
    };

    (toolbox, formatter, copiers)
}

/// Whether `program` can be found on `PATH`.
pub fn has_program(program: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
    })
}
