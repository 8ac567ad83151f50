use chrono::{DateTime, Datelike, Timelike, Utc};
use std::cmp::Ordering;

use super::{push_u16_both, push_u32_both, read_u16_le, read_u32_le, IsoError, IsoResult};

pub const FLAG_DIRECTORY: u8 = 0x02;
pub const FLAG_MULTI_EXTENT: u8 = 0x80;

/// Fixed part of a directory record, before the identifier.
const FIXED_LEN: usize = 33;

/// One ISO9660 directory record (ECMA-119 9.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub ext_attr_len: u8,
    pub extent: u32,
    pub data_len: u32,
    pub recorded_at: [u8; 7],
    pub flags: u8,
    pub file_unit_size: u8,
    pub interleave_gap: u8,
    pub volume_seq: u16,
    pub identifier: Vec<u8>,
    pub system_use: Vec<u8>,
    /// SUSP continuation areas reached through `CE` entries, in chain order.
    pub continuation: Vec<Vec<u8>>,
}

impl DirectoryRecord {
    /// Parse the record starting at `buf[0]`.
    pub fn parse(buf: &[u8]) -> IsoResult<Self> {
        let len = *buf
            .first()
            .ok_or_else(|| IsoError::Malformed("empty directory record".to_string()))?
            as usize;
        if len < FIXED_LEN + 1 || len > buf.len() {
            return Err(IsoError::Malformed(format!(
                "directory record length {} out of range",
                len
            )));
        }

        let ident_len = buf[32] as usize;
        let ident_end = FIXED_LEN + ident_len;
        if ident_end > len {
            return Err(IsoError::Malformed(format!(
                "identifier length {} exceeds record length {}",
                ident_len, len
            )));
        }
        let su_start = if ident_len % 2 == 0 { ident_end + 1 } else { ident_end };

        let mut recorded_at = [0u8; 7];
        recorded_at.copy_from_slice(&buf[18..25]);

        Ok(Self {
            ext_attr_len: buf[1],
            extent: read_u32_le(buf, 2),
            data_len: read_u32_le(buf, 10),
            recorded_at,
            flags: buf[25],
            file_unit_size: buf[26],
            interleave_gap: buf[27],
            volume_seq: read_u16_le(buf, 28),
            identifier: buf[FIXED_LEN..ident_end].to_vec(),
            system_use: buf.get(su_start..len).map(<[u8]>::to_vec).unwrap_or_default(),
            continuation: Vec::new(),
        })
    }

    /// Build a record for a new file or directory.
    pub fn new(identifier: Vec<u8>, flags: u8, recorded_at: [u8; 7]) -> Self {
        Self {
            ext_attr_len: 0,
            extent: 0,
            data_len: 0,
            recorded_at,
            flags,
            file_unit_size: 0,
            interleave_gap: 0,
            volume_seq: 1,
            identifier,
            system_use: Vec::new(),
            continuation: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        let ident_len = self.identifier.len();
        let pad = if ident_len % 2 == 0 { 1 } else { 0 };
        FIXED_LEN + ident_len + pad + self.system_use.len()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) -> IsoResult<()> {
        let len = self.encoded_len();
        if len > u8::MAX as usize {
            return Err(IsoError::InvalidName {
                name: String::from_utf8_lossy(&self.identifier).into_owned(),
                reason: format!("directory record would be {} bytes", len),
            });
        }

        out.push(len as u8);
        out.push(self.ext_attr_len);
        push_u32_both(out, self.extent);
        push_u32_both(out, self.data_len);
        out.extend_from_slice(&self.recorded_at);
        out.push(self.flags);
        out.push(self.file_unit_size);
        out.push(self.interleave_gap);
        push_u16_both(out, self.volume_seq);
        out.push(self.identifier.len() as u8);
        out.extend_from_slice(&self.identifier);
        if self.identifier.len() % 2 == 0 {
            out.push(0);
        }
        out.extend_from_slice(&self.system_use);
        Ok(())
    }

    /// The 34-byte form stored in a volume descriptor (no system use field).
    pub fn to_root_bytes(&self) -> IsoResult<[u8; 34]> {
        let root = Self {
            identifier: vec![0],
            system_use: Vec::new(),
            continuation: Vec::new(),
            ..self.clone()
        };

        let mut out = Vec::with_capacity(34);
        root.write_to(&mut out)?;
        out.try_into().map_err(|out: Vec<u8>| {
            IsoError::Malformed(format!("root record encoded to {} bytes", out.len()))
        })
    }

    /// The system use field followed by its continuation areas.
    pub fn susp_areas(&self) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.system_use.as_slice())
            .chain(self.continuation.iter().map(Vec::as_slice))
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// Set on every extent of a multi-extent file except the last.
    pub fn is_multi_extent(&self) -> bool {
        self.flags & FLAG_MULTI_EXTENT != 0
    }

    pub fn is_dot(&self) -> bool {
        self.identifier == [0]
    }

    pub fn is_dotdot(&self) -> bool {
        self.identifier == [1]
    }
}

/// Encode a timestamp in the 7-byte directory record format.
pub fn record_timestamp(at: DateTime<Utc>) -> [u8; 7] {
    let year = (at.year() - 1900).clamp(0, 255) as u8;
    [
        year,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
        0,
    ]
}

/// Strip the `;version` suffix and a trailing dot from an ISO9660 file identifier.
pub fn base_identifier(identifier: &str) -> &str {
    let base = identifier.split(';').next().unwrap_or(identifier);
    base.strip_suffix('.').unwrap_or(base)
}

/// Check a new primary-hierarchy identifier against the d-character set.
pub fn validate_iso_identifier(identifier: &str, directory: bool) -> IsoResult<()> {
    let invalid = |reason: &str| IsoError::InvalidName {
        name: identifier.to_string(),
        reason: reason.to_string(),
    };

    if identifier.is_empty() {
        return Err(invalid("empty identifier"));
    }
    if identifier.len() > 31 {
        return Err(invalid("longer than 31 characters"));
    }
    let allowed = |c: char| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_';
    if directory {
        if !identifier.chars().all(allowed) {
            return Err(invalid("directory identifiers use A-Z, 0-9 and _ only"));
        }
    } else if !identifier.chars().all(|c| allowed(c) || c == '.' || c == ';') {
        return Err(invalid("file identifiers use A-Z, 0-9, _, . and ; only"));
    }
    Ok(())
}

/// ISO9660 ordering of file identifiers: name, then extension, each padded
/// with spaces, then version in descending order.
pub fn compare_iso_identifiers(a: &[u8], b: &[u8]) -> Ordering {
    fn split(ident: &[u8]) -> (&[u8], &[u8], u32) {
        let (base, version) = match ident.iter().position(|&c| c == b';') {
            Some(pos) => (&ident[..pos], &ident[pos + 1..]),
            None => (ident, &[][..]),
        };
        let version = std::str::from_utf8(version)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        match base.iter().position(|&c| c == b'.') {
            Some(pos) => (&base[..pos], &base[pos + 1..], version),
            None => (base, &[][..], version),
        }
    }

    fn padded_cmp(a: &[u8], b: &[u8]) -> Ordering {
        let len = a.len().max(b.len());
        let pad = |s: &[u8], i: usize| s.get(i).copied().unwrap_or(b' ');
        (0..len)
            .map(|i| pad(a, i).cmp(&pad(b, i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    let (a_name, a_ext, a_ver) = split(a);
    let (b_name, b_ext, b_ver) = split(b);
    padded_cmp(a_name, b_name)
        .then_with(|| padded_cmp(a_ext, b_ext))
        .then_with(|| b_ver.cmp(&a_ver))
}
