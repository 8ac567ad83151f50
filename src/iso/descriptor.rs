use std::io::{Read, Seek, SeekFrom};

use super::record::DirectoryRecord;
use super::{read_u32_le, write_u32_both, IsoError, IsoResult, DESCRIPTOR_START, SECTOR_SIZE};

pub const TYPE_BOOT_RECORD: u8 = 0;
pub const TYPE_PRIMARY: u8 = 1;
pub const TYPE_SUPPLEMENTARY: u8 = 2;
pub const TYPE_TERMINATOR: u8 = 255;

const STANDARD_ID: &[u8; 5] = b"CD001";
const EL_TORITO_ID: &[u8] = b"EL TORITO SPECIFICATION";
const JOLIET_ESCAPES: [&[u8; 3]; 3] = [b"%/@", b"%/C", b"%/E"];

// Field offsets shared by primary and supplementary descriptors.
const VOLUME_SPACE_SIZE: usize = 80;
const ESCAPE_SEQUENCES: usize = 88;
const PATH_TABLE_SIZE: usize = 132;
const L_PATH_TABLE: usize = 140;
const OPT_L_PATH_TABLE: usize = 144;
const M_PATH_TABLE: usize = 148;
const OPT_M_PATH_TABLE: usize = 152;
const ROOT_RECORD: usize = 156;
const BOOT_CATALOG_POINTER: usize = 71;

/// Identifiers of the volume structures that can follow sector 16
/// (ECMA-119 descriptors and the ECMA-167 recognition sequence).
const VOLUME_STRUCTURE_IDS: [&[u8; 5]; 7] =
    [b"CD001", b"BEA01", b"NSR02", b"NSR03", b"TEA01", b"BOOT2", b"CDW02"];

/// Upper bound on descriptors scanned before giving up on a terminator.
const MAX_DESCRIPTORS: u32 = 64;

/// A volume descriptor as read from the image, kept as its raw sector so
/// unknown fields survive a rewrite untouched.
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    pub sector: u32,
    pub raw: Vec<u8>,
}

impl VolumeDescriptor {
    /// An El Torito boot record at `sector` naming the catalog at `catalog`.
    pub fn boot_record(sector: u32, catalog: u32) -> Self {
        let mut raw = vec![0u8; SECTOR_SIZE];
        raw[0] = TYPE_BOOT_RECORD;
        raw[1..6].copy_from_slice(STANDARD_ID);
        raw[6] = 1;
        raw[7..7 + EL_TORITO_ID.len()].copy_from_slice(EL_TORITO_ID);
        let mut vd = Self { sector, raw };
        vd.set_boot_catalog_sector(catalog);
        vd
    }

    pub fn kind(&self) -> u8 {
        self.raw[0]
    }

    pub fn is_joliet(&self) -> bool {
        self.kind() == TYPE_SUPPLEMENTARY
            && JOLIET_ESCAPES
                .iter()
                .any(|esc| &self.raw[ESCAPE_SEQUENCES..ESCAPE_SEQUENCES + 3] == *esc)
    }

    pub fn is_el_torito(&self) -> bool {
        self.kind() == TYPE_BOOT_RECORD && self.raw[7..7 + EL_TORITO_ID.len()] == *EL_TORITO_ID
    }

    pub fn volume_space_size(&self) -> u32 {
        read_u32_le(&self.raw, VOLUME_SPACE_SIZE)
    }

    pub fn root_record(&self) -> IsoResult<DirectoryRecord> {
        DirectoryRecord::parse(&self.raw[ROOT_RECORD..ROOT_RECORD + 34])
    }

    pub fn boot_catalog_sector(&self) -> u32 {
        read_u32_le(&self.raw, BOOT_CATALOG_POINTER)
    }

    /// Path tables named by a primary or supplementary descriptor, as
    /// (first sector, size in bytes).
    pub fn path_tables(&self) -> Vec<(u32, u32)> {
        if self.kind() != TYPE_PRIMARY && self.kind() != TYPE_SUPPLEMENTARY {
            return Vec::new();
        }
        let size = read_u32_le(&self.raw, PATH_TABLE_SIZE);
        let be = |offset: usize| {
            u32::from_be_bytes([
                self.raw[offset],
                self.raw[offset + 1],
                self.raw[offset + 2],
                self.raw[offset + 3],
            ])
        };
        [
            read_u32_le(&self.raw, L_PATH_TABLE),
            read_u32_le(&self.raw, OPT_L_PATH_TABLE),
            be(M_PATH_TABLE),
            be(OPT_M_PATH_TABLE),
        ]
        .into_iter()
        .filter(|&sector| sector != 0)
        .map(|sector| (sector, size))
        .collect()
    }

    pub fn volume_id(&self) -> String {
        String::from_utf8_lossy(&self.raw[40..72]).trim_end().to_string()
    }

    pub fn set_volume_space_size(&mut self, sectors: u32) {
        write_u32_both(&mut self.raw, VOLUME_SPACE_SIZE, sectors);
    }

    pub fn set_root_record(&mut self, root: &DirectoryRecord) -> IsoResult<()> {
        self.raw[ROOT_RECORD..ROOT_RECORD + 34].copy_from_slice(&root.to_root_bytes()?);
        Ok(())
    }

    /// Point the descriptor at new L and M path tables of `size` bytes.
    pub fn set_path_tables(&mut self, size: u32, l_sector: u32, m_sector: u32) {
        write_u32_both(&mut self.raw, PATH_TABLE_SIZE, size);
        self.raw[L_PATH_TABLE..L_PATH_TABLE + 4].copy_from_slice(&l_sector.to_le_bytes());
        self.raw[OPT_L_PATH_TABLE..OPT_L_PATH_TABLE + 4].fill(0);
        self.raw[M_PATH_TABLE..M_PATH_TABLE + 4].copy_from_slice(&m_sector.to_be_bytes());
        self.raw[OPT_M_PATH_TABLE..OPT_M_PATH_TABLE + 4].fill(0);
    }

    pub fn set_boot_catalog_sector(&mut self, sector: u32) {
        self.raw[BOOT_CATALOG_POINTER..BOOT_CATALOG_POINTER + 4]
            .copy_from_slice(&sector.to_le_bytes());
    }
}

/// The descriptors this editor understands, in on-disk order.
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    pub all: Vec<VolumeDescriptor>,
    pub primary: usize,
    pub joliet: Option<usize>,
    pub boot: Option<usize>,
}

impl DescriptorSet {
    pub fn read<R: Read + Seek>(reader: &mut R) -> IsoResult<Self> {
        let mut all = Vec::new();
        let mut primary = None;
        let mut joliet = None;
        let mut boot = None;

        for index in 0..MAX_DESCRIPTORS {
            let sector = DESCRIPTOR_START + index;
            let mut raw = vec![0u8; SECTOR_SIZE];
            reader.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
            reader.read_exact(&mut raw).map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => IsoError::NotIso(format!(
                    "image ends inside the volume descriptor set at sector {}",
                    sector
                )),
                _ => IsoError::Io(e),
            })?;

            if &raw[1..6] != STANDARD_ID {
                return Err(IsoError::NotIso(format!(
                    "missing CD001 identifier in sector {}",
                    sector
                )));
            }

            let descriptor = VolumeDescriptor { sector, raw };
            match descriptor.kind() {
                TYPE_TERMINATOR => {
                    let primary = primary.ok_or_else(|| {
                        IsoError::NotIso("no primary volume descriptor".to_string())
                    })?;
                    all.push(descriptor);
                    return Ok(Self { all, primary, joliet, boot });
                }
                TYPE_PRIMARY if primary.is_none() => primary = Some(all.len()),
                TYPE_SUPPLEMENTARY if joliet.is_none() && descriptor.is_joliet() => {
                    joliet = Some(all.len())
                }
                TYPE_BOOT_RECORD if boot.is_none() && descriptor.is_el_torito() => {
                    boot = Some(all.len())
                }
                _ => {}
            }
            all.push(descriptor);
        }

        Err(IsoError::NotIso("volume descriptor set has no terminator".to_string()))
    }

    /// Insert an El Torito boot record at sector 17, moving the descriptors
    /// from there on one sector later. Returns the sector the set now ends at.
    pub fn insert_boot_record(&mut self, catalog: u32) -> u32 {
        let at = DESCRIPTOR_START + 1;
        let index = self
            .all
            .iter()
            .position(|vd| vd.sector >= at)
            .unwrap_or(self.all.len());
        for vd in &mut self.all[index..] {
            vd.sector += 1;
        }
        self.all.insert(index, VolumeDescriptor::boot_record(at, catalog));

        if self.primary >= index {
            self.primary += 1;
        }
        if let Some(joliet) = self.joliet.as_mut().filter(|j| **j >= index) {
            *joliet += 1;
        }
        self.boot = Some(index);
        self.all.last().map_or(at, |vd| vd.sector)
    }

    pub fn primary(&self) -> &VolumeDescriptor {
        &self.all[self.primary]
    }

    pub fn joliet(&self) -> Option<&VolumeDescriptor> {
        self.joliet.map(|i| &self.all[i])
    }

    pub fn boot(&self) -> Option<&VolumeDescriptor> {
        self.boot.map(|i| &self.all[i])
    }
}

/// True when `sector` holds a volume descriptor or volume recognition
/// structure.
pub fn is_volume_structure(sector: &[u8]) -> bool {
    sector.len() >= 6 && VOLUME_STRUCTURE_IDS.iter().any(|id| sector[1..6] == **id)
}
