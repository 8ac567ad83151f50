//! A small hand-assembled image shaped like an Ubuntu server ISO: Rock Ridge
//! primary tree, optional Joliet tree, El Torito catalog and /boot/grub/grub.cfg.
//! Options drop the boot record or move Rock Ridge fields into SUSP
//! continuation areas.

use std::fs;
use std::path::{Path, PathBuf};

use super::descriptor::{
    VolumeDescriptor, TYPE_BOOT_RECORD, TYPE_PRIMARY, TYPE_SUPPLEMENTARY, TYPE_TERMINATOR,
};
use super::eltorito::{BootCatalog, BootEntry};
use super::record::{DirectoryRecord, FLAG_DIRECTORY};
use super::susp::{
    continuation_entry, rock_ridge_fields, ContinuationArea, POSIX_DIR_MODE, POSIX_FILE_MODE,
};
use super::tree::{encode_ucs2, serialize_directory};
use super::{IsoResult, DESCRIPTOR_START, SECTOR_SIZE};

pub const VOLUME_ID: &str = "Ubuntu-Server 22.04.4 LTS amd64";
pub const ORIGINAL_GRUB: &[u8] = b"set timeout=30\n\
menuentry \"Try or Install Ubuntu Server\" {\n\
\tlinux\t/casper/vmlinuz  ---\n\
\tinitrd\t/casper/initrd\n\
}\n";
pub const BOOT_IMAGE_SECTOR: u32 = 25;
/// Sector holding the continuation areas written with `Options::continuation`.
pub const CONTINUATION_SECTOR: u32 = 37;
/// Padding entry that ends the root's continuation chain.
pub const CHAIN_TAIL: &[u8] = b"PD\x08\x01tail";

const CATALOG: u32 = 24;
const ROOT: u32 = 26;
const BOOT: u32 = 27;
const GRUB: u32 = 28;
const PATH_L: u32 = 29;
const PATH_M: u32 = 30;
const J_ROOT: u32 = 31;
const J_BOOT: u32 = 32;
const J_GRUB: u32 = 33;
const J_PATH_L: u32 = 34;
const J_PATH_M: u32 = 35;
const GRUB_CFG: u32 = 36;
const TOTAL: u32 = 38;

const ROOT_AREA_OFFSET: u32 = 64;
const BOOT_NAME_OFFSET: u32 = 512;
const TAIL_OFFSET: u32 = 1024;

const STAMP: [u8; 7] = [124, 1, 1, 0, 0, 0, 0];

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub joliet: bool,
    /// Write an El Torito boot record and catalog.
    pub el_torito: bool,
    /// Chain the root's extension reference through two continuation areas
    /// and keep the `boot` name in a third.
    pub continuation: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            joliet: false,
            el_torito: true,
            continuation: false,
        }
    }
}

/// Write the fixture to `dir/source.iso` and return its path.
pub fn build(dir: &Path, options: Options) -> IsoResult<PathBuf> {
    let mut image = vec![0u8; TOTAL as usize * SECTOR_SIZE];

    let mut descriptors = vec![primary_descriptor(TYPE_PRIMARY)?];
    if options.el_torito {
        descriptors.push(boot_record());
    }
    if options.joliet {
        descriptors.push(primary_descriptor(TYPE_SUPPLEMENTARY)?);
    }
    descriptors.push(bare_descriptor(TYPE_TERMINATOR));
    for (i, raw) in descriptors.iter().enumerate() {
        put(&mut image, DESCRIPTOR_START + i as u32, raw);
    }

    if options.el_torito {
        let catalog = BootCatalog::single(
            0,
            *b"fixture                 ",
            BootEntry::no_emulation(0, BOOT_IMAGE_SECTOR, SECTOR_SIZE as u64),
        );
        put(&mut image, CATALOG, &catalog.to_sector());
        put(&mut image, BOOT_IMAGE_SECTOR, &[0xEB; SECTOR_SIZE]);
    }
    put(&mut image, GRUB_CFG, ORIGINAL_GRUB);

    // primary hierarchy with Rock Ridge names
    let mut sp = b"SP\x07\x01\xBE\xEF\x00".to_vec();
    sp.extend(rock_ridge_fields(None, POSIX_DIR_MODE, 3, STAMP));
    let mut boot = dir_record(b"BOOT", BOOT, Some("boot"));
    if options.continuation {
        let tail = area(TAIL_OFFSET, CHAIN_TAIL.len());
        let mut head = extension_reference();
        head.extend(continuation_entry(tail));
        sp.extend(continuation_entry(area(ROOT_AREA_OFFSET, head.len())));
        put_at(&mut image, ROOT_AREA_OFFSET, &head);
        put_at(&mut image, TAIL_OFFSET, CHAIN_TAIL);

        let name = b"NM\x09\x01\x00boot";
        boot.system_use = rock_ridge_fields(None, POSIX_DIR_MODE, 2, STAMP);
        boot.system_use.extend(continuation_entry(area(BOOT_NAME_OFFSET, name.len())));
        put_at(&mut image, BOOT_NAME_OFFSET, name);
    }
    let mut root_entries = vec![boot];
    if options.el_torito {
        root_entries.push(file_record(
            b"BOOT.CAT;1",
            CATALOG,
            SECTOR_SIZE as u32,
            Some("boot.catalog"),
        ));
    }
    put(&mut image, ROOT, &directory((ROOT, sp), ROOT, root_entries)?);
    put(
        &mut image,
        BOOT,
        &directory(
            (BOOT, rock_ridge_fields(None, POSIX_DIR_MODE, 3, STAMP)),
            ROOT,
            vec![dir_record(b"GRUB", GRUB, Some("grub"))],
        )?,
    );
    put(
        &mut image,
        GRUB,
        &directory(
            (GRUB, rock_ridge_fields(None, POSIX_DIR_MODE, 2, STAMP)),
            BOOT,
            vec![file_record(
                b"GRUB.CFG;1",
                GRUB_CFG,
                ORIGINAL_GRUB.len() as u32,
                Some("grub.cfg"),
            )],
        )?,
    );
    let (l, m) = tables(false);
    put(&mut image, PATH_L, &l);
    put(&mut image, PATH_M, &m);

    if options.joliet {
        let mut root_entries = vec![dir_record(&encode_ucs2("boot"), J_BOOT, None)];
        if options.el_torito {
            let catalog = encode_ucs2("boot.catalog");
            root_entries.push(file_record(&catalog, CATALOG, SECTOR_SIZE as u32, None));
        }
        put(&mut image, J_ROOT, &directory((J_ROOT, Vec::new()), J_ROOT, root_entries)?);
        let grub = dir_record(&encode_ucs2("grub"), J_GRUB, None);
        put(&mut image, J_BOOT, &directory((J_BOOT, Vec::new()), J_ROOT, vec![grub])?);
        let cfg = encode_ucs2("grub.cfg");
        let cfg = file_record(&cfg, GRUB_CFG, ORIGINAL_GRUB.len() as u32, None);
        put(&mut image, J_GRUB, &directory((J_GRUB, Vec::new()), J_BOOT, vec![cfg])?);
        let (l, m) = tables(true);
        put(&mut image, J_PATH_L, &l);
        put(&mut image, J_PATH_M, &m);
    }

    let path = dir.join("source.iso");
    fs::write(&path, image)?;
    Ok(path)
}

fn put(image: &mut [u8], sector: u32, data: &[u8]) {
    let start = sector as usize * SECTOR_SIZE;
    image[start..start + data.len()].copy_from_slice(data);
}

/// Place `data` at byte `offset` of the continuation sector.
fn put_at(image: &mut [u8], offset: u32, data: &[u8]) {
    let start = CONTINUATION_SECTOR as usize * SECTOR_SIZE + offset as usize;
    image[start..start + data.len()].copy_from_slice(data);
}

fn area(offset: u32, len: usize) -> ContinuationArea {
    ContinuationArea {
        block: CONTINUATION_SECTOR,
        offset,
        len: len as u32,
    }
}

/// `ER` entry announcing RRIP 1.09 as mkisofs writes it.
pub fn extension_reference() -> Vec<u8> {
    let id = b"RRIP_1991A";
    let descriptor = b"THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT \
        FOR POSIX FILE SYSTEM SEMANTICS";
    let source = b"PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE";
    let mut out = b"ER".to_vec();
    out.push((8 + id.len() + descriptor.len() + source.len()) as u8);
    out.extend_from_slice(&[1, id.len() as u8, descriptor.len() as u8, source.len() as u8, 1]);
    out.extend_from_slice(id);
    out.extend_from_slice(descriptor);
    out.extend_from_slice(source);
    out
}

fn write_u16_both(out: &mut [u8], offset: usize, value: u16) {
    out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    out[offset + 2..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn bare_descriptor(kind: u8) -> Vec<u8> {
    let mut raw = vec![0u8; SECTOR_SIZE];
    raw[0] = kind;
    raw[1..6].copy_from_slice(b"CD001");
    raw[6] = 1;
    raw
}

fn boot_record() -> Vec<u8> {
    let mut raw = bare_descriptor(TYPE_BOOT_RECORD);
    raw[7..30].copy_from_slice(b"EL TORITO SPECIFICATION");
    raw[71..75].copy_from_slice(&CATALOG.to_le_bytes());
    raw
}

fn primary_descriptor(kind: u8) -> IsoResult<Vec<u8>> {
    let joliet = kind == TYPE_SUPPLEMENTARY;
    let mut vd = VolumeDescriptor {
        sector: 0,
        raw: bare_descriptor(kind),
    };
    let mut volume_id = [b' '; 32];
    volume_id[..VOLUME_ID.len()].copy_from_slice(VOLUME_ID.as_bytes());
    vd.raw[40..72].copy_from_slice(&volume_id);
    if joliet {
        vd.raw[88..91].copy_from_slice(b"%/E");
    }
    write_u16_both(&mut vd.raw, 120, 1);
    write_u16_both(&mut vd.raw, 124, 1);
    write_u16_both(&mut vd.raw, 128, SECTOR_SIZE as u16);
    vd.raw[881] = 1;
    vd.set_volume_space_size(TOTAL);

    let (root, l, m) = if joliet {
        (J_ROOT, J_PATH_L, J_PATH_M)
    } else {
        (ROOT, PATH_L, PATH_M)
    };
    vd.set_path_tables(tables(joliet).0.len() as u32, l, m);
    let mut record = DirectoryRecord::new(vec![0], FLAG_DIRECTORY, STAMP);
    record.extent = root;
    record.data_len = SECTOR_SIZE as u32;
    vd.set_root_record(&record)?;
    Ok(vd.raw)
}

fn dir_record(identifier: &[u8], extent: u32, name: Option<&str>) -> DirectoryRecord {
    let mut record = DirectoryRecord::new(identifier.to_vec(), FLAG_DIRECTORY, STAMP);
    record.extent = extent;
    record.data_len = SECTOR_SIZE as u32;
    if let Some(name) = name {
        record.system_use = rock_ridge_fields(Some(name), POSIX_DIR_MODE, 2, STAMP);
    }
    record
}

fn file_record(identifier: &[u8], extent: u32, len: u32, name: Option<&str>) -> DirectoryRecord {
    let mut record = DirectoryRecord::new(identifier.to_vec(), 0, STAMP);
    record.extent = extent;
    record.data_len = len;
    if let Some(name) = name {
        record.system_use = rock_ridge_fields(Some(name), POSIX_FILE_MODE, 1, STAMP);
    }
    record
}

/// One-sector directory at `own.0` whose parent lives at `parent`.
fn directory(
    own: (u32, Vec<u8>),
    parent: u32,
    entries: Vec<DirectoryRecord>,
) -> IsoResult<Vec<u8>> {
    let (extent, system_use) = own;
    let mut dot = dir_record(&[0], extent, None);
    dot.system_use = system_use.clone();
    let mut dotdot = dir_record(&[1], parent, None);
    dotdot.system_use = if system_use.is_empty() {
        Vec::new()
    } else {
        rock_ridge_fields(None, POSIX_DIR_MODE, 2, STAMP)
    };
    let records: Vec<DirectoryRecord> = [dot, dotdot].into_iter().chain(entries).collect();
    serialize_directory(records.iter())
}

fn tables(joliet: bool) -> (Vec<u8>, Vec<u8>) {
    if joliet {
        let boot = encode_ucs2("boot");
        let grub = encode_ucs2("grub");
        path_tables(&[(&[0], J_ROOT, 1), (&boot, J_BOOT, 1), (&grub, J_GRUB, 2)])
    } else {
        path_tables(&[(&[0], ROOT, 1), (b"BOOT", BOOT, 1), (b"GRUB", GRUB, 2)])
    }
}

fn path_tables(dirs: &[(&[u8], u32, u16)]) -> (Vec<u8>, Vec<u8>) {
    let mut l = Vec::new();
    let mut m = Vec::new();
    for &(identifier, extent, parent) in dirs {
        l.push(identifier.len() as u8);
        l.push(0);
        l.extend_from_slice(&extent.to_le_bytes());
        l.extend_from_slice(&parent.to_le_bytes());
        l.extend_from_slice(identifier);
        m.push(identifier.len() as u8);
        m.push(0);
        m.extend_from_slice(&extent.to_be_bytes());
        m.extend_from_slice(&parent.to_be_bytes());
        m.extend_from_slice(identifier);
        if identifier.len() % 2 == 1 {
            l.push(0);
            m.push(0);
        }
    }
    (l, m)
}
