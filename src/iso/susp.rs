//! System Use Sharing Protocol and Rock Ridge fields carried in directory records.

use super::{push_u32_both, read_u32_le, write_u32_both};

pub const POSIX_FILE_MODE: u32 = 0o100444;
pub const POSIX_DIR_MODE: u32 = 0o040555;

/// Where a `CE` entry says the system use field continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationArea {
    pub block: u32,
    pub offset: u32,
    pub len: u32,
}

/// One SUSP entry: two-byte signature, version and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspEntry<'a> {
    pub signature: [u8; 2],
    pub version: u8,
    pub data: &'a [u8],
    pub offset: usize,
}

/// Iterate the SUSP entries of a system use field, stopping at the first
/// malformed entry or at an `ST` terminator.
pub fn entries(system_use: &[u8]) -> impl Iterator<Item = SuspEntry<'_>> {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        if pos + 4 > system_use.len() {
            return None;
        }
        let len = system_use[pos + 2] as usize;
        if len < 4 || pos + len > system_use.len() {
            return None;
        }
        let entry = SuspEntry {
            signature: [system_use[pos], system_use[pos + 1]],
            version: system_use[pos + 3],
            data: &system_use[pos + 4..pos + len],
            offset: pos,
        };
        if &entry.signature == b"ST" {
            return None;
        }
        pos += len;
        Some(entry)
    })
}

/// True when the field starts with an `SP` entry, which marks a hierarchy
/// using SUSP (and in practice Rock Ridge).
pub fn has_sharing_protocol(system_use: &[u8]) -> bool {
    entries(system_use)
        .next()
        .map(|e| &e.signature == b"SP" && e.data.starts_with(&[0xBE, 0xEF]))
        .unwrap_or(false)
}

/// Rock Ridge alternate name assembled from the `NM` entries of a system
/// use field and its continuation areas.
pub fn alternate_name<'a>(areas: impl IntoIterator<Item = &'a [u8]>) -> Option<String> {
    let mut name = Vec::new();
    let mut found = false;
    let names = areas
        .into_iter()
        .flat_map(entries)
        .filter(|e| &e.signature == b"NM");
    for entry in names {
        let Some((&flags, rest)) = entry.data.split_first() else {
            continue;
        };
        // CURRENT / PARENT markers carry no name
        if flags & 0x06 != 0 {
            continue;
        }
        found = true;
        name.extend_from_slice(rest);
    }
    found.then(|| String::from_utf8_lossy(&name).into_owned())
}

/// Rock Ridge fields for a new entry: `PX`, `TF` and, when named, `NM`.
pub fn rock_ridge_fields(name: Option<&str>, mode: u32, links: u32, stamp: [u8; 7]) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(b"PX");
    out.push(36);
    out.push(1);
    push_u32_both(&mut out, mode);
    push_u32_both(&mut out, links);
    push_u32_both(&mut out, 0);
    push_u32_both(&mut out, 0);

    // modify, access and attribute-change times
    out.extend_from_slice(b"TF");
    out.push(5 + 3 * 7);
    out.push(1);
    out.push(0x0E);
    for _ in 0..3 {
        out.extend_from_slice(&stamp);
    }

    if let Some(name) = name {
        out.extend_from_slice(b"NM");
        out.push((5 + name.len()) as u8);
        out.push(1);
        out.push(0);
        out.extend_from_slice(name.as_bytes());
    }

    out
}

/// The continuation area named by the `CE` entry of `system_use`.
pub fn continuation(system_use: &[u8]) -> Option<ContinuationArea> {
    entries(system_use)
        .find(|e| &e.signature == b"CE" && e.data.len() >= 24)
        .map(|e| ContinuationArea {
            block: read_u32_le(e.data, 0),
            offset: read_u32_le(e.data, 8),
            len: read_u32_le(e.data, 16),
        })
}

/// Point the `CE` entry of `system_use` at `area`. Returns false when there
/// is no `CE` entry.
pub fn set_continuation(system_use: &mut [u8], area: ContinuationArea) -> bool {
    let Some(offset) = entries(system_use)
        .find(|e| &e.signature == b"CE" && e.data.len() >= 24)
        .map(|e| e.offset + 4)
    else {
        return false;
    };
    write_u32_both(system_use, offset, area.block);
    write_u32_both(system_use, offset + 8, area.offset);
    write_u32_both(system_use, offset + 16, area.len);
    true
}

/// A `CE` entry naming `area`.
pub fn continuation_entry(area: ContinuationArea) -> Vec<u8> {
    let mut out = b"CE\x1c\x01".to_vec();
    push_u32_both(&mut out, area.block);
    push_u32_both(&mut out, area.offset);
    push_u32_both(&mut out, area.len);
    out
}

/// Rewrite the locations carried by `CL` and `PL` entries.
pub fn remap_locations(system_use: &mut [u8], map: impl Fn(u32) -> Option<u32>) {
    let targets: Vec<usize> = entries(system_use)
        .filter(|e| (&e.signature == b"CL" || &e.signature == b"PL") && e.data.len() >= 8)
        .map(|e| e.offset + 4)
        .collect();

    for offset in targets {
        let old = read_u32_le(system_use, offset);
        if let Some(new) = map(old) {
            write_u32_both(system_use, offset, new);
        }
    }
}
