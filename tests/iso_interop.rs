//! Images built from a bsdtar-mastered source (Rock Ridge with a `CE`
//! continuation on the root, Joliet, El Torito) and read back with
//! libarchive's ISO9660 reader.

use assert_cmd::Command;
use std::path::{Path, PathBuf};

use isoforge::iso::eltorito::BootCatalog;
use isoforge::iso::{FileInfo, IsoImage};

const SOURCE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/bsdtar-rockridge.iso");
const GRUB_CFG: &str = "/BOOT/GRUB/GRUB.CFG;1";

fn build(dir: &Path) -> PathBuf {
    let output = dir.join("output.iso");
    Command::cargo_bin("isoforge")
        .unwrap()
        .current_dir(dir)
        .args(["--non-interactive", "--time", "-1", "--iso", SOURCE, "--output"])
        .arg(&output)
        .assert()
        .success();
    output
}

fn bsdtar_available() -> bool {
    std::process::Command::new("bsdtar")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn bsdtar(args: &[&str], image: &Path) -> Vec<u8> {
    Command::new("bsdtar")
        .args(args)
        .arg(image)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone()
}

fn extract(image: &Path, name: &str) -> Vec<u8> {
    Command::new("bsdtar")
        .arg("-xOf")
        .arg(image)
        .arg(name)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone()
}

#[test]
fn bsdtar_source_is_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let output = build(dir.path());

    let image = IsoImage::open(&output).unwrap();
    assert_eq!(
        image.list_dir("/").unwrap(),
        vec!["boot", "boot.catalog", "casper", "server"]
    );
    assert_eq!(image.list_dir("/CASPER").unwrap(), vec!["initrd", "vmlinuz", ".empty"]);
    assert_eq!(image.read_file("/CASPER/VMLINUZ.;1").unwrap(), b"vmlinuz\n");
    assert_eq!(
        image.read_joliet_file("/boot/grub/grub.cfg").unwrap(),
        image.read_file(GRUB_CFG).unwrap()
    );
    assert_eq!(image.boot_entries().len(), 1);
}

#[test]
fn output_reads_back_with_bsdtar() {
    if !bsdtar_available() {
        eprintln!("bsdtar not installed; skipping libarchive read-back");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let output = build(dir.path());

    let listing = String::from_utf8(bsdtar(&["-tf"], &output)).unwrap();
    let names: Vec<&str> = listing.lines().collect();
    for expected in [
        "boot/grub/grub.cfg",
        "boot/grub/i386-pc/eltorito.img",
        "boot.catalog",
        "casper/vmlinuz",
        "casper/initrd",
        "server",
        "server/user-data",
        "server/meta-data",
    ] {
        assert!(names.contains(&expected), "{} missing from {:?}", expected, names);
    }

    let user_data = String::from_utf8(extract(&output, "server/user-data")).unwrap();
    assert!(user_data.starts_with("#cloud-config\nautoinstall:\n"));
    assert!(user_data.contains("hostname: ubuntu-server\n"));
    assert!(extract(&output, "server/meta-data").is_empty());

    let grub = String::from_utf8(extract(&output, "boot/grub/grub.cfg")).unwrap();
    assert!(grub.starts_with("set timeout=-1\n"));
    assert!(grub.contains("autoinstall"));
    assert_eq!(extract(&output, "casper/vmlinuz"), b"vmlinuz\n");

    let image = IsoImage::open(&output).unwrap();
    let FileInfo::Extent { sector, .. } = image.lookup(GRUB_CFG).unwrap() else {
        panic!("{} has no extent", GRUB_CFG);
    };
    let catalog = BootCatalog::parse(&extract(&output, "boot.catalog")).unwrap();
    assert_eq!(catalog.entries.len(), 1);
    assert_eq!(catalog.entries[0].load_rba, sector);
    assert!(catalog.entries[0].bootable);
}
