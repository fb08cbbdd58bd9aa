mod common;

use std::process::Command;

use common::{fake_toolbox, has_program, stage2_pattern, Workspace};
use fzimage::boot::Stage2Location;
use fzimage::components::recipe::{assemble, ImageKind, Toolbox};
use fzimage::fake::{STAGE1_ENTRY_OFFSET, STAGE1_LOCATION_OFFSET};
use fzimage::fs::fat::BootSectorHeader;
use fzimage::fs::partitions::mbr::read_partition_table;
use fzimage::fs::FsKind;
use fzimage::image::Image;
use fzimage::settings::Settings;

const STAGE2_LEN: usize = 1300;

#[tokio::test]
async fn floppy_with_three_sector_stage2() {
    let workspace = Workspace::new("floppy-scenario", ImageKind::Floppy, STAGE2_LEN);
    let (toolbox, formatter, copiers) = fake_toolbox();

    let layout = assemble(&workspace.request, &Settings::default(), &toolbox)
        .await
        .unwrap();

    assert_eq!(layout.stage2, Stage2Location::new(1, 3).unwrap());

    let image = Image::open(&workspace.request.target).unwrap();
    assert_eq!(image.sectors(), 2880);

    let formatted = formatter.formatted();
    assert_eq!(formatted.len(), 1);
    assert_eq!(formatted[0].kind, FsKind::Fat12);
    assert_eq!(formatted[0].reserved_sectors, Some(4));
    assert_eq!(formatted[0].offset_sectors, 0);
    assert_eq!(formatted[0].sectors, 2880);

    let stage1 = std::fs::read(&workspace.request.stage1).unwrap();
    let boot_sector = image.read_at(0, 512).unwrap();
    let header = BootSectorHeader::read(&image, 0).unwrap();
    assert_eq!(header.reserved_sectors(), 4);
    assert_eq!(&boot_sector[..3], &stage1[..3]);
    let formatted_header = BootSectorHeader::new(*b"mkfs.fat", 4, 0, 2880);
    assert_eq!(&boot_sector[3..36], &formatted_header.as_bytes()[3..36]);
    assert_eq!(
        &boot_sector[STAGE1_ENTRY_OFFSET..STAGE1_LOCATION_OFFSET],
        &stage1[STAGE1_ENTRY_OFFSET..STAGE1_LOCATION_OFFSET]
    );
    assert_eq!(
        &boot_sector[STAGE1_LOCATION_OFFSET..STAGE1_LOCATION_OFFSET + 5],
        &[1, 0, 0, 0, 3]
    );
    assert_eq!(
        &boot_sector[STAGE1_LOCATION_OFFSET + 5..],
        &stage1[STAGE1_LOCATION_OFFSET + 5..]
    );

    assert_eq!(
        image.read_at(512, STAGE2_LEN).unwrap(),
        stage2_pattern(STAGE2_LEN)
    );

    let volume = copiers
        .volume(&layout.volume_target(&workspace.request.target))
        .unwrap();
    assert_eq!(volume.tree(), ["/boot/", "/boot/kernel.elf", "/readme.txt"]);
    assert_eq!(volume.file("/readme.txt").unwrap(), b"hello from the image\n");
    assert_eq!(volume.sessions(), 1);

    assert!(read_partition_table(&image).unwrap().used_partitions().is_empty());
    assert_eq!(image.read_at(0x1BE, 64).unwrap(), vec![0; 64]);
}

#[tokio::test]
async fn rebuilding_overwrites_previous_image() {
    let workspace = Workspace::new("floppy-rebuild", ImageKind::Floppy, 512);
    std::fs::write(&workspace.request.target, vec![0xFF; 4096]).unwrap();
    let (toolbox, _, _) = fake_toolbox();

    assemble(&workspace.request, &Settings::default(), &toolbox)
        .await
        .unwrap();

    let image = Image::open(&workspace.request.target).unwrap();
    assert_eq!(image.sectors(), 2880);
    assert_eq!(image.read_at(2 * 512, 512).unwrap(), vec![0; 512]);
}

#[tokio::test]
async fn floppy_with_system_tools() {
    if !["mkfs.fat", "mmd", "mcopy", "mdir", "mtype"]
        .iter()
        .all(|tool| has_program(tool))
    {
        eprintln!("dosfstools or mtools missing, skipping");
        return;
    }

    let mut workspace = Workspace::new("floppy-system", ImageKind::Floppy, STAGE2_LEN);
    workspace.request.files.push("assets".into());
    let settings = Settings::default();
    let toolbox = Toolbox::system(&settings);

    assemble(&workspace.request, &settings, &toolbox)
        .await
        .unwrap();

    let image = Image::open(&workspace.request.target).unwrap();
    let header = BootSectorHeader::read(&image, 0).unwrap();
    assert!(header.reserved_sectors() >= 4);
    assert_eq!(
        image.read_at(512, STAGE2_LEN).unwrap(),
        stage2_pattern(STAGE2_LEN)
    );

    let readme = Command::new("mtype")
        .env("MTOOLS_SKIP_CHECK", "1")
        .arg("-i")
        .arg(&workspace.request.target)
        .arg("::/readme.txt")
        .output()
        .unwrap();
    assert!(readme.status.success());
    assert_eq!(readme.stdout, b"hello from the image\n");

    let fonts = Command::new("mdir")
        .env("MTOOLS_SKIP_CHECK", "1")
        .arg("-b")
        .arg("-i")
        .arg(&workspace.request.target)
        .arg("::/assets/fonts")
        .output()
        .unwrap();
    assert!(fonts.status.success());
    assert!(String::from_utf8_lossy(&fonts.stdout)
        .to_lowercase()
        .contains("mono.psf"));

    assert!(!fzimage::fs::mtools::DriveConfig::path_for(&workspace.request.target).exists());
}
