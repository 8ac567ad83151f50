use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use super::record::{base_identifier, compare_iso_identifiers, DirectoryRecord};
use super::{susp, IsoError, IsoResult, SECTOR_SIZE};

/// Refuse to load hierarchies larger than this many directories.
const MAX_DIRECTORIES: usize = 1 << 20;

/// Longest chain of SUSP continuation areas followed for one record.
const MAX_CONTINUATIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyKind {
    Primary { rock_ridge: bool },
    Joliet,
}

/// A directory entry other than `.` and `..`.
#[derive(Debug, Clone)]
pub struct Entry {
    pub record: DirectoryRecord,
    /// Node index for subdirectories.
    pub child: Option<usize>,
    /// Index of staged file data written by the image writer.
    pub data: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DirNode {
    pub dot: DirectoryRecord,
    pub dotdot: DirectoryRecord,
    pub parent: usize,
    pub entries: Vec<Entry>,
    /// Extent the directory occupied in the source image, if any.
    pub source_extent: Option<u32>,
}

/// One directory hierarchy (primary or Joliet). Node 0 is the root.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    pub kind: HierarchyKind,
    pub nodes: Vec<DirNode>,
}

impl Hierarchy {
    /// Load the hierarchy rooted at `root` from an image of `image_len` bytes.
    pub fn read<R: Read + Seek>(
        reader: &mut R,
        root: &DirectoryRecord,
        joliet: bool,
        image_len: u64,
    ) -> IsoResult<Self> {
        let mut nodes: Vec<DirNode> = Vec::new();
        let mut visited = HashSet::new();
        // (record describing the directory, parent node index, slot in parent)
        let mut pending = vec![(root.clone(), 0usize, None::<usize>)];

        while let Some((record, parent, slot)) = pending.pop() {
            if !visited.insert(record.extent) {
                return Err(IsoError::Malformed(format!(
                    "directory loop at sector {}",
                    record.extent
                )));
            }
            if nodes.len() >= MAX_DIRECTORIES {
                return Err(IsoError::Malformed("too many directories".to_string()));
            }

            let data = read_extent(reader, &record, image_len)?;
            let mut records = parse_directory(&data)?;
            if !joliet {
                for parsed in &mut records {
                    load_continuation(reader, parsed, image_len)?;
                }
            }
            let mut records = records.into_iter();
            let (Some(dot), Some(dotdot)) = (records.next(), records.next()) else {
                return Err(IsoError::Malformed(format!(
                    "directory at sector {} lacks . and .. records",
                    record.extent
                )));
            };
            if !dot.is_dot() || !dotdot.is_dotdot() {
                return Err(IsoError::Malformed(format!(
                    "directory at sector {} does not start with . and ..",
                    record.extent
                )));
            }
            let entries: Vec<DirectoryRecord> = records.collect();

            let index = nodes.len();
            nodes.push(DirNode {
                dot,
                dotdot,
                parent: if slot.is_some() { parent } else { index },
                entries: entries
                    .into_iter()
                    .map(|record| Entry { record, child: None, data: None })
                    .collect(),
                source_extent: Some(record.extent),
            });
            if let Some(slot) = slot {
                nodes[parent].entries[slot].child = Some(index);
            }

            for (slot, entry) in nodes[index].entries.iter().enumerate().rev() {
                if entry.record.is_directory() && !is_relocated_placeholder(&entry.record) {
                    pending.push((entry.record.clone(), index, Some(slot)));
                }
            }
        }

        let rock_ridge = !joliet && susp::has_sharing_protocol(&nodes[0].dot.system_use);
        let kind = if joliet {
            HierarchyKind::Joliet
        } else {
            HierarchyKind::Primary { rock_ridge }
        };
        Ok(Self { kind, nodes })
    }

    pub fn rock_ridge(&self) -> bool {
        matches!(self.kind, HierarchyKind::Primary { rock_ridge: true })
    }

    /// Human-readable name of an entry: Rock Ridge name, Joliet name or the
    /// ISO9660 identifier without its version.
    pub fn display_name(&self, record: &DirectoryRecord) -> String {
        match self.kind {
            HierarchyKind::Joliet => {
                let name = decode_ucs2(&record.identifier);
                name.split(';').next().unwrap_or(&name).to_string()
            }
            HierarchyKind::Primary { rock_ridge } => {
                if rock_ridge {
                    if let Some(name) = susp::alternate_name(record.susp_areas()) {
                        return name;
                    }
                }
                base_identifier(&String::from_utf8_lossy(&record.identifier)).to_string()
            }
        }
    }

    /// Find the entries of `node` named `name`. Multi-extent files yield
    /// several consecutive records.
    pub fn find(&self, node: usize, name: &str) -> Vec<usize> {
        self.nodes[node]
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| self.matches(&e.record, name))
            .map(|(i, _)| i)
            .collect()
    }

    fn matches(&self, record: &DirectoryRecord, name: &str) -> bool {
        match self.kind {
            HierarchyKind::Joliet => self.display_name(record).eq_ignore_ascii_case(name),
            HierarchyKind::Primary { .. } => {
                let identifier = String::from_utf8_lossy(&record.identifier);
                identifier.eq_ignore_ascii_case(name)
                    || base_identifier(&identifier).eq_ignore_ascii_case(base_identifier(name))
            }
        }
    }

    /// Walk `components` from the root, returning the node they name.
    pub fn resolve_dir(&self, components: &[&str]) -> IsoResult<usize> {
        let mut node = 0;
        for component in components {
            node = self
                .find(node, component)
                .into_iter()
                .find_map(|i| self.nodes[node].entries[i].child)
                .ok_or_else(|| IsoError::NotFound(components.join("/")))?;
        }
        Ok(node)
    }

    /// Insert `entry` into `node` at its sorted position and return its index.
    pub fn insert(&mut self, node: usize, entry: Entry) -> usize {
        let kind = self.kind;
        let entries = &mut self.nodes[node].entries;
        let position = entries.partition_point(|existing| {
            compare_identifiers(kind, &existing.record.identifier, &entry.record.identifier)
                == Ordering::Less
        });
        entries.insert(position, entry);
        position
    }

    /// Add a new directory node under `parent` and return its index.
    pub fn add_node(
        &mut self,
        parent: usize,
        dot: DirectoryRecord,
        dotdot: DirectoryRecord,
    ) -> usize {
        let index = self.nodes.len();
        self.nodes.push(DirNode {
            dot,
            dotdot,
            parent,
            entries: Vec::new(),
            source_extent: None,
        });
        index
    }

    /// Remove entries `indices` (ascending) from `node`.
    pub fn remove(&mut self, node: usize, indices: &[usize]) {
        for &i in indices.iter().rev() {
            self.nodes[node].entries.remove(i);
        }
    }

    /// Directory nodes in path-table order: breadth first, children in
    /// directory order.
    pub fn breadth_first(&self) -> Vec<usize> {
        let mut order = vec![0];
        let mut cursor = 0;
        while cursor < order.len() {
            let node = order[cursor];
            order.extend(self.nodes[node].entries.iter().filter_map(|e| e.child));
            cursor += 1;
        }
        order
    }

    /// True when files in this directory carry a `;1` version suffix.
    pub fn uses_versions(&self, node: usize) -> bool {
        let suffix: &[u8] = match self.kind {
            HierarchyKind::Joliet => &[0, b';', 0, b'1'],
            HierarchyKind::Primary { .. } => b";1",
        };
        let mut files = self.nodes[node]
            .entries
            .iter()
            .filter(|e| !e.record.is_directory())
            .peekable();
        if files.peek().is_none() {
            return true;
        }
        files.any(|e| e.record.identifier.ends_with(suffix))
    }
}

pub fn compare_identifiers(kind: HierarchyKind, a: &[u8], b: &[u8]) -> Ordering {
    match kind {
        HierarchyKind::Joliet => a.cmp(b),
        HierarchyKind::Primary { .. } => compare_iso_identifiers(a, b),
    }
}

pub fn encode_ucs2(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(|unit| unit.to_be_bytes()).collect()
}

pub fn decode_ucs2(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Directories moved by Rock Ridge deep relocation carry `RE` and are reached
/// through the `CL` link of a placeholder. They are left as they are in the
/// source image.
fn is_relocated_placeholder(record: &DirectoryRecord) -> bool {
    record
        .susp_areas()
        .flat_map(susp::entries)
        .any(|e| &e.signature == b"RE")
}

/// Follow the `CE` chain of `record` and keep each continuation area.
fn load_continuation<R: Read + Seek>(
    reader: &mut R,
    record: &mut DirectoryRecord,
    image_len: u64,
) -> IsoResult<()> {
    let mut next = susp::continuation(&record.system_use);
    while let Some(area) = next {
        if area.len == 0 {
            break;
        }
        if record.continuation.len() >= MAX_CONTINUATIONS {
            return Err(IsoError::Malformed(format!(
                "continuation chain of {:?} is longer than {} areas",
                String::from_utf8_lossy(&record.identifier),
                MAX_CONTINUATIONS
            )));
        }
        let start = area.block as u64 * SECTOR_SIZE as u64 + area.offset as u64;
        if area.offset as u64 + area.len as u64 > SECTOR_SIZE as u64
            || start + area.len as u64 > image_len
        {
            return Err(IsoError::Malformed(format!(
                "continuation area at sector {} offset {} ({} bytes) is out of bounds",
                area.block, area.offset, area.len
            )));
        }
        let mut data = vec![0u8; area.len as usize];
        reader.seek(SeekFrom::Start(start))?;
        reader.read_exact(&mut data)?;
        next = susp::continuation(&data);
        record.continuation.push(data);
    }
    Ok(())
}

fn read_extent<R: Read + Seek>(
    reader: &mut R,
    record: &DirectoryRecord,
    image_len: u64,
) -> IsoResult<Vec<u8>> {
    let start = record.extent as u64 * SECTOR_SIZE as u64;
    let len = record.data_len as u64;
    if start + len > image_len {
        return Err(IsoError::Malformed(format!(
            "directory extent at sector {} ({} bytes) runs past the end of the image",
            record.extent, len
        )));
    }
    let mut data = vec![0u8; len as usize];
    reader.seek(SeekFrom::Start(start))?;
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Split a directory extent into records. Zero bytes pad to the next sector.
pub fn parse_directory(data: &[u8]) -> IsoResult<Vec<DirectoryRecord>> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if data[pos] == 0 {
            pos = (pos / SECTOR_SIZE + 1) * SECTOR_SIZE;
            continue;
        }
        let record = DirectoryRecord::parse(&data[pos..])?;
        pos += data[pos] as usize;
        records.push(record);
    }
    Ok(records)
}

/// Serialize directory records so none crosses a sector boundary. The result
/// is padded to whole sectors.
pub fn serialize_directory<'a>(
    records: impl Iterator<Item = &'a DirectoryRecord>,
) -> IsoResult<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        let len = record.encoded_len();
        let used = out.len() % SECTOR_SIZE;
        if used + len > SECTOR_SIZE {
            out.resize(out.len() + SECTOR_SIZE - used, 0);
        }
        record.write_to(&mut out)?;
    }
    let padded = out.len().div_ceil(SECTOR_SIZE).max(1) * SECTOR_SIZE;
    out.resize(padded, 0);
    Ok(out)
}

/// Size in bytes a directory will occupy once serialized.
pub fn directory_size<'a>(records: impl Iterator<Item = &'a DirectoryRecord>) -> usize {
    let mut size = 0;
    for record in records {
        let len = record.encoded_len();
        let used = size % SECTOR_SIZE;
        if used + len > SECTOR_SIZE {
            size += SECTOR_SIZE - used;
        }
        size += len;
    }
    size.div_ceil(SECTOR_SIZE).max(1) * SECTOR_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iso::record::FLAG_DIRECTORY;

    fn record(name: &[u8], flags: u8) -> DirectoryRecord {
        DirectoryRecord::new(name.to_vec(), flags, [0; 7])
    }

    #[test]
    fn test_records_do_not_cross_sectors() {
        let names: Vec<DirectoryRecord> = (0..100)
            .map(|i| record(format!("FILE_{:04}.TXT;1", i).as_bytes(), 0))
            .collect();
        let data = serialize_directory(names.iter()).unwrap();
        assert_eq!(data.len(), directory_size(names.iter()));
        assert_eq!(data.len() % SECTOR_SIZE, 0);

        let parsed = parse_directory(&data).unwrap();
        assert_eq!(parsed.len(), 100);
        assert_eq!(parsed[99].identifier, b"FILE_0099.TXT;1");
    }

    #[test]
    fn test_empty_directory_takes_one_sector() {
        assert_eq!(directory_size(std::iter::empty()), SECTOR_SIZE);
    }

    #[test]
    fn test_ucs2_names() {
        let encoded = encode_ucs2("user-data;1");
        assert_eq!(encoded.len(), 22);
        assert_eq!(decode_ucs2(&encoded), "user-data;1");
    }

    #[test]
    fn test_insert_keeps_primary_order() {
        let mut tree = Hierarchy {
            kind: HierarchyKind::Primary { rock_ridge: false },
            nodes: vec![DirNode {
                dot: record(&[0], FLAG_DIRECTORY),
                dotdot: record(&[1], FLAG_DIRECTORY),
                parent: 0,
                entries: Vec::new(),
                source_extent: None,
            }],
        };
        for name in ["USER_DATA;1", "BOOT", "META_DATA;1"] {
            tree.insert(0, Entry { record: record(name.as_bytes(), 0), child: None, data: None });
        }
        let names: Vec<String> = tree.nodes[0]
            .entries
            .iter()
            .map(|e| tree.display_name(&e.record))
            .collect();
        assert_eq!(names, vec!["BOOT", "META_DATA", "USER_DATA"]);
        assert_eq!(tree.find(0, "meta_data;1"), vec![1]);
        assert_eq!(tree.find(0, "META_DATA"), vec![1]);
        assert!(tree.uses_versions(0));
    }

    #[test]
    fn test_continuation_chain_is_loaded() {
        use crate::iso::susp::{continuation_entry, ContinuationArea};
        use std::io::Cursor;

        let mut image = vec![0u8; 3 * SECTOR_SIZE];
        let mut first = b"PD\x04\x01".to_vec();
        first.extend(continuation_entry(ContinuationArea { block: 2, offset: 100, len: 12 }));
        image[SECTOR_SIZE + 64..SECTOR_SIZE + 64 + first.len()].copy_from_slice(&first);
        let second = b"NM\x0c\x01\x00vmlinuz";
        image[2 * SECTOR_SIZE + 100..2 * SECTOR_SIZE + 112].copy_from_slice(second);

        let mut file = record(b"VMLINUZ.;1", 0);
        file.system_use =
            continuation_entry(ContinuationArea { block: 1, offset: 64, len: first.len() as u32 });
        let len = image.len() as u64;
        load_continuation(&mut Cursor::new(image), &mut file, len).unwrap();

        assert_eq!(file.continuation, vec![first, second.to_vec()]);
        let tree = Hierarchy {
            kind: HierarchyKind::Primary { rock_ridge: true },
            nodes: Vec::new(),
        };
        assert_eq!(tree.display_name(&file), "vmlinuz");
    }

    #[test]
    fn test_continuation_out_of_bounds_is_malformed() {
        use crate::iso::susp::{continuation_entry, ContinuationArea};
        use std::io::Cursor;

        let mut file = record(b"A;1", 0);
        file.system_use =
            continuation_entry(ContinuationArea { block: 0, offset: 2000, len: 100 });
        let result = load_continuation(&mut Cursor::new(vec![0u8; SECTOR_SIZE]), &mut file, 2048);
        assert!(matches!(result, Err(IsoError::Malformed(_))));

        // a chain that points back at itself stops at the length limit
        let mut looped = vec![0u8; SECTOR_SIZE];
        let area = ContinuationArea { block: 0, offset: 0, len: 28 };
        looped[..28].copy_from_slice(&continuation_entry(area));
        file.system_use = continuation_entry(area);
        let result = load_continuation(&mut Cursor::new(looped), &mut file, 2048);
        assert!(matches!(result, Err(IsoError::Malformed(_))));
    }

    #[test]
    fn test_breadth_first_order() {
        let mut tree = Hierarchy {
            kind: HierarchyKind::Joliet,
            nodes: vec![DirNode {
                dot: record(&[0], FLAG_DIRECTORY),
                dotdot: record(&[1], FLAG_DIRECTORY),
                parent: 0,
                entries: Vec::new(),
                source_extent: None,
            }],
        };
        let a = tree.add_node(0, record(&[0], FLAG_DIRECTORY), record(&[1], FLAG_DIRECTORY));
        let b = tree.add_node(a, record(&[0], FLAG_DIRECTORY), record(&[1], FLAG_DIRECTORY));
        let c = tree.add_node(0, record(&[0], FLAG_DIRECTORY), record(&[1], FLAG_DIRECTORY));
        let dir_entry = |name: &str, child: usize| Entry {
            record: record(&encode_ucs2(name), FLAG_DIRECTORY),
            child: Some(child),
            data: None,
        };
        tree.insert(0, dir_entry("a", a));
        tree.insert(a, dir_entry("b", b));
        tree.insert(0, dir_entry("c", c));

        assert_eq!(tree.breadth_first(), vec![0, a, c, b]);
        assert_eq!(tree.resolve_dir(&["A", "b"]).unwrap(), b);
        assert!(tree.resolve_dir(&["missing"]).is_err());
    }
}
