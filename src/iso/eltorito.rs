//! El Torito boot catalog parsing and generation.

use super::{read_u16_le, read_u32_le, IsoError, IsoResult, SECTOR_SIZE};

const ENTRY_LEN: usize = 32;
const HEADER_VALIDATION: u8 = 0x01;
const HEADER_SECTION: u8 = 0x90;
const HEADER_FINAL_SECTION: u8 = 0x91;
const EXTENSION_ENTRY: u8 = 0x44;
const BOOTABLE: u8 = 0x88;
const MEDIA_NO_EMULATION: u8 = 0;

/// Platform ID of x86 BIOS boot entries.
pub const PLATFORM_X86: u8 = 0;

/// One initial/default or section entry of a boot catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootEntry {
    pub platform_id: u8,
    pub bootable: bool,
    pub media_type: u8,
    pub load_segment: u16,
    pub system_type: u8,
    pub sector_count: u16,
    pub load_rba: u32,
}

impl BootEntry {
    fn parse(raw: &[u8], platform_id: u8) -> Self {
        Self {
            platform_id,
            bootable: raw[0] == BOOTABLE,
            media_type: raw[1] & 0x0F,
            load_segment: read_u16_le(raw, 2),
            system_type: raw[4],
            sector_count: read_u16_le(raw, 6),
            load_rba: read_u32_le(raw, 8),
        }
    }

    /// A bootable no-emulation entry loading `len` bytes from `sector`.
    pub fn no_emulation(platform_id: u8, sector: u32, len: u64) -> Self {
        let virtual_sectors = len.div_ceil(512).clamp(1, u16::MAX as u64) as u16;
        Self {
            platform_id,
            bootable: true,
            media_type: MEDIA_NO_EMULATION,
            load_segment: 0,
            system_type: 0,
            sector_count: virtual_sectors,
            load_rba: sector,
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0] = if self.bootable { BOOTABLE } else { 0 };
        out[1] = self.media_type;
        out[2..4].copy_from_slice(&self.load_segment.to_le_bytes());
        out[4] = self.system_type;
        out[5] = 0;
        out[6..8].copy_from_slice(&self.sector_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.load_rba.to_le_bytes());
    }
}

/// A parsed boot catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootCatalog {
    /// Platform and ID string of the validation entry.
    pub platform_id: u8,
    pub id_string: [u8; 24],
    pub entries: Vec<BootEntry>,
}

impl BootCatalog {
    pub fn parse(sector: &[u8]) -> IsoResult<Self> {
        if sector.len() < 2 * ENTRY_LEN {
            return Err(IsoError::Malformed("boot catalog is truncated".to_string()));
        }
        let validation = &sector[..ENTRY_LEN];
        if validation[0] != HEADER_VALIDATION || validation[30] != 0x55 || validation[31] != 0xAA {
            return Err(IsoError::Malformed("boot catalog validation entry is invalid".to_string()));
        }
        if checksum(validation) != 0 {
            return Err(IsoError::Malformed("boot catalog checksum mismatch".to_string()));
        }

        let platform_id = validation[1];
        let mut id_string = [0u8; 24];
        id_string.copy_from_slice(&validation[4..28]);

        let mut entries = vec![BootEntry::parse(&sector[ENTRY_LEN..2 * ENTRY_LEN], platform_id)];

        let mut pos = 2 * ENTRY_LEN;
        while pos + ENTRY_LEN <= sector.len() {
            let header = &sector[pos..pos + ENTRY_LEN];
            if header[0] != HEADER_SECTION && header[0] != HEADER_FINAL_SECTION {
                break;
            }
            let section_platform = header[1];
            let count = read_u16_le(header, 2) as usize;
            pos += ENTRY_LEN;

            let mut seen = 0;
            while seen < count && pos + ENTRY_LEN <= sector.len() {
                let raw = &sector[pos..pos + ENTRY_LEN];
                pos += ENTRY_LEN;
                if raw[0] == EXTENSION_ENTRY {
                    continue;
                }
                entries.push(BootEntry::parse(raw, section_platform));
                seen += 1;
            }
            if header[0] == HEADER_FINAL_SECTION {
                break;
            }
        }

        Ok(Self { platform_id, id_string, entries })
    }

    /// A catalog with a single default entry.
    pub fn single(platform_id: u8, id_string: [u8; 24], entry: BootEntry) -> Self {
        Self {
            platform_id,
            id_string,
            entries: vec![entry],
        }
    }

    /// Serialize the validation entry and the default entry into one sector.
    /// Only the default entry is written; a catalog built by this editor has
    /// no section entries.
    pub fn to_sector(&self) -> Vec<u8> {
        let mut sector = vec![0u8; SECTOR_SIZE];
        sector[0] = HEADER_VALIDATION;
        sector[1] = self.platform_id;
        sector[4..28].copy_from_slice(&self.id_string);
        sector[30] = 0x55;
        sector[31] = 0xAA;
        let sum = checksum(&sector[..ENTRY_LEN]);
        sector[28..30].copy_from_slice(&sum.wrapping_neg().to_le_bytes());

        if let Some(entry) = self.entries.first() {
            entry.write_to(&mut sector[ENTRY_LEN..2 * ENTRY_LEN]);
        }
        sector
    }
}

/// Sum of the little-endian words of a validation entry; zero when valid.
fn checksum(validation: &[u8]) -> u16 {
    validation
        .chunks_exact(2)
        .fold(0u16, |acc, word| acc.wrapping_add(u16::from_le_bytes([word[0], word[1]])))
}
