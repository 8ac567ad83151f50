//! Serialization of an edited image.
//!
//! Layout of the output, in sectors:
//!
//! ```text
//! [ source image, padded ][ staged files ][ boot catalog ][ directories ]
//! [ continuation areas ][ path tables ]
//! ```
//!
//! Only the volume descriptors inside the copied source are patched. An image
//! without an El Torito boot record gets one at sector 17; the descriptors
//! after it move one sector later into a sector the source does not use.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::descriptor::{is_volume_structure, DescriptorSet, TYPE_PRIMARY, TYPE_SUPPLEMENTARY};
use super::eltorito::{BootCatalog, BootEntry, PLATFORM_X86};
use super::image::{FileInfo, IsoImage};
use super::record::DirectoryRecord;
use super::susp::{self, remap_locations, ContinuationArea};
use super::tree::{directory_size, serialize_directory, DirNode, Hierarchy};
use super::{sectors_for, IsoError, IsoResult, SECTOR_SIZE};

const SECTOR: u64 = SECTOR_SIZE as u64;

/// Placement of one hierarchy in the output.
struct HierarchyLayout {
    tree: Hierarchy,
    order: Vec<usize>,
    extents: Vec<u32>,
    sizes: Vec<u32>,
    path_table: PathTables,
}

struct PathTables {
    l: Vec<u8>,
    m: Vec<u8>,
    l_sector: u32,
    m_sector: u32,
}

struct Layout {
    source_sectors: u64,
    staged_extents: Vec<u32>,
    catalog: Option<(u32, BootCatalog)>,
    hierarchies: Vec<HierarchyLayout>,
    /// SUSP continuation areas of the rewritten directories, padded to
    /// whole sectors.
    continuations: Vec<u8>,
    descriptors: DescriptorSet,
    total_sectors: u32,
}

pub(super) fn write_image(image: &IsoImage, output: &Path) -> IsoResult<()> {
    ensure_distinct(&image.path, output)?;

    let layout = plan(image)?;
    info!(
        "Writing {} ({} sectors, {} appended)",
        output.display(),
        layout.total_sectors,
        layout.total_sectors as u64 - layout.source_sectors
    );

    let partial = partial_path(output);
    let result = write_partial(image, &layout, &partial).and_then(|_| {
        fs::rename(&partial, output)?;
        Ok(())
    });
    if result.is_err() && partial.exists() {
        if let Err(e) = fs::remove_file(&partial) {
            warn!("Failed to remove partial output {}: {}", partial.display(), e);
        }
    }
    result
}

fn ensure_distinct(source: &Path, output: &Path) -> IsoResult<()> {
    if !output.exists() {
        return Ok(());
    }
    if fs::canonicalize(source)? == fs::canonicalize(output)? {
        return Err(IsoError::OverwritesSource(output.display().to_string()));
    }
    Ok(())
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    output.with_file_name(name)
}

fn plan(image: &IsoImage) -> IsoResult<Layout> {
    let source_sectors = sectors_for(image.len);
    let mut next = source_sectors;

    let mut staged_extents = Vec::with_capacity(image.staged.len());
    for staged in &image.staged {
        if staged.len == 0 {
            staged_extents.push(0);
            continue;
        }
        staged_extents.push(sector_u32(next)?);
        next += sectors_for(staged.len);
    }

    let catalog = match image.boot_target {
        Some(target) => {
            let (sector, len) = match target {
                FileInfo::Extent { sector, len } => (sector, len),
                FileInfo::Staged { index, len } => (staged_extents[index], len),
            };
            let (platform_id, id_string) = image
                .catalog
                .as_ref()
                .map_or((PLATFORM_X86, [0u8; 24]), |old| (old.platform_id, old.id_string));
            let entry = BootEntry::no_emulation(platform_id, sector, len);
            let catalog = BootCatalog::single(platform_id, id_string, entry);
            let at = sector_u32(next)?;
            next += 1;
            debug!("New boot catalog at sector {} loads sector {}", at, sector);
            Some((at, catalog))
        }
        None => None,
    };
    let old_catalog = image.descriptors.boot().map(|vd| vd.boot_catalog_sector());

    let mut descriptors = image.descriptors.clone();
    if let (None, Some((at, _))) = (descriptors.boot, &catalog) {
        let end = descriptors.insert_boot_record(*at);
        ensure_unused(image, end)?;
        info!("Adding an El Torito boot record; descriptor set now ends at sector {}", end);
    }

    let mut trees = vec![image.primary.clone()];
    if let Some(joliet) = &image.joliet {
        trees.push(joliet.clone());
    }

    let mut hierarchies = Vec::with_capacity(trees.len());
    for tree in trees {
        let order = tree.breadth_first();
        let mut extents = vec![0u32; tree.nodes.len()];
        let mut sizes = vec![0u32; tree.nodes.len()];
        for &node in &order {
            let n = &tree.nodes[node];
            let size = directory_size(directory_records(n));
            extents[node] = sector_u32(next)?;
            sizes[node] = size as u32;
            next += sectors_for(size as u64);
        }
        hierarchies.push(HierarchyLayout {
            tree,
            order,
            extents,
            sizes,
            path_table: PathTables {
                l: Vec::new(),
                m: Vec::new(),
                l_sector: 0,
                m_sector: 0,
            },
        });
    }

    let new_catalog = catalog.as_ref().map(|(at, _)| *at);
    for layout in &mut hierarchies {
        fill_records(layout, &staged_extents, old_catalog, new_catalog);
    }

    let continuations = place_continuations(&mut hierarchies, sector_u32(next)?)?;
    next += sectors_for(continuations.len() as u64);

    for layout in &mut hierarchies {
        let (l, m) = path_tables(layout)?;
        let table_sectors = sectors_for(l.len() as u64);
        layout.path_table = PathTables {
            l_sector: sector_u32(next)?,
            m_sector: sector_u32(next + table_sectors)?,
            l,
            m,
        };
        next += 2 * table_sectors;
    }

    Ok(Layout {
        source_sectors,
        staged_extents,
        catalog,
        hierarchies,
        continuations,
        descriptors,
        total_sectors: sector_u32(next)?,
    })
}

fn sector_u32(sector: u64) -> IsoResult<u32> {
    u32::try_from(sector).map_err(|_| {
        IsoError::TooLarge(format!("sector {} is beyond the ISO9660 limit", sector))
    })
}

fn directory_records(node: &DirNode) -> impl Iterator<Item = &DirectoryRecord> {
    std::iter::once(&node.dot)
        .chain(std::iter::once(&node.dotdot))
        .chain(node.entries.iter().map(|e| &e.record))
}

fn directory_records_mut(node: &mut DirNode) -> impl Iterator<Item = &mut DirectoryRecord> {
    std::iter::once(&mut node.dot)
        .chain(std::iter::once(&mut node.dotdot))
        .chain(node.entries.iter_mut().map(|e| &mut e.record))
}

/// Fail unless source sector `sector` can take a moved volume descriptor:
/// inside the source, not a volume structure and not referenced by any
/// directory, file, path table or continuation area.
fn ensure_unused(image: &IsoImage, sector: u32) -> IsoResult<()> {
    if sector as u64 >= sectors_for(image.len) {
        return Err(IsoError::DescriptorSetFull(sector));
    }
    let mut raw = vec![0u8; SECTOR_SIZE];
    let mut file = &image.file;
    file.seek(SeekFrom::Start(sector as u64 * SECTOR))?;
    file.read_exact(&mut raw)?;
    if is_volume_structure(&raw) || source_references(image, sector) {
        return Err(IsoError::DescriptorSetFull(sector));
    }
    Ok(())
}

fn source_references(image: &IsoImage, sector: u32) -> bool {
    let covers = |start: u32, len: u64| {
        let start = start as u64;
        len > 0 && (start..start + sectors_for(len)).contains(&(sector as u64))
    };

    let mut tables = image.descriptors.all.iter().flat_map(|vd| vd.path_tables());
    if tables.any(|(at, size)| covers(at, size as u64)) {
        return true;
    }

    let trees = std::iter::once(&image.primary).chain(image.joliet.as_ref());
    trees.flat_map(|tree| &tree.nodes).any(|node| {
        let directory = node
            .source_extent
            .is_some_and(|extent| covers(extent, node.dot.data_len as u64));
        let records = directory_records(node).any(|record| {
            let data = !record.is_directory()
                && record.extent != 0
                && covers(record.extent, record.data_len as u64);
            let continued = record
                .susp_areas()
                .filter_map(susp::continuation)
                .any(|area| area.block == sector);
            data || continued
        });
        directory || records
    })
}

/// Point every record at its new location.
fn fill_records(
    layout: &mut HierarchyLayout,
    staged: &[u32],
    old_catalog: Option<u32>,
    new_catalog: Option<u32>,
) {
    let relocated: HashMap<u32, u32> = layout
        .tree
        .nodes
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.source_extent.map(|old| (old, layout.extents[i])))
        .collect();
    let remap = |old: u32| relocated.get(&old).copied();

    let extents = &layout.extents;
    let sizes = &layout.sizes;
    let parents: Vec<usize> = layout.tree.nodes.iter().map(|n| n.parent).collect();

    for (index, node) in layout.tree.nodes.iter_mut().enumerate() {
        node.dot.extent = extents[index];
        node.dot.data_len = sizes[index];
        node.dotdot.extent = extents[parents[index]];
        node.dotdot.data_len = sizes[parents[index]];

        for entry in &mut node.entries {
            let record = &mut entry.record;
            if let Some(child) = entry.child {
                record.extent = extents[child];
                record.data_len = sizes[child];
            } else if let Some(index) = entry.data {
                record.extent = staged[index];
            } else if let (Some(old), Some(new)) = (old_catalog, new_catalog) {
                if record.extent == old && !record.is_directory() {
                    record.extent = new;
                    record.data_len = SECTOR_SIZE as u32;
                }
            }
        }

        for record in directory_records_mut(node) {
            remap_locations(&mut record.system_use, remap);
            for area in &mut record.continuation {
                remap_locations(area, remap);
            }
        }
    }
}

/// Copy the continuation areas of every written record into a region
/// starting at sector `start` and point each `CE` entry at its copy. Areas
/// are packed so none crosses a sector.
fn place_continuations(hierarchies: &mut [HierarchyLayout], start: u32) -> IsoResult<Vec<u8>> {
    let mut region = Vec::new();
    for layout in hierarchies.iter_mut() {
        for &node in &layout.order {
            for record in directory_records_mut(&mut layout.tree.nodes[node]) {
                relocate_continuation(record, start, &mut region)?;
            }
        }
    }
    if !region.is_empty() {
        debug!(
            "Continuation areas at sector {} ({} bytes)",
            start,
            region.len()
        );
    }
    region.resize(region.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE, 0);
    Ok(region)
}

fn relocate_continuation(
    record: &mut DirectoryRecord,
    start: u32,
    region: &mut Vec<u8>,
) -> IsoResult<()> {
    let mut placed: Vec<(usize, ContinuationArea)> = Vec::with_capacity(record.continuation.len());
    for area in &record.continuation {
        let used = region.len() % SECTOR_SIZE;
        if used + area.len() > SECTOR_SIZE {
            region.resize(region.len() + SECTOR_SIZE - used, 0);
        }
        let position = region.len();
        let block = sector_u32(start as u64 + (position / SECTOR_SIZE) as u64)?;
        placed.push((
            position,
            ContinuationArea {
                block,
                offset: (position % SECTOR_SIZE) as u32,
                len: area.len() as u32,
            },
        ));
        region.extend_from_slice(area);
    }

    let Some(&(_, first)) = placed.first() else {
        return Ok(());
    };
    susp::set_continuation(&mut record.system_use, first);
    for pair in placed.windows(2) {
        let (position, area) = pair[0];
        let copy = &mut region[position..position + area.len as usize];
        susp::set_continuation(copy, pair[1].1);
    }
    Ok(())
}

/// Build the L (little-endian) and M (big-endian) path tables.
fn path_tables(layout: &HierarchyLayout) -> IsoResult<(Vec<u8>, Vec<u8>)> {
    let tree = &layout.tree;
    let mut identifiers: HashMap<usize, &[u8]> = HashMap::new();
    for node in &tree.nodes {
        for entry in &node.entries {
            if let Some(child) = entry.child {
                identifiers.insert(child, &entry.record.identifier);
            }
        }
    }

    let mut numbers = HashMap::new();
    let mut l = Vec::new();
    let mut m = Vec::new();
    for (position, &node) in layout.order.iter().enumerate() {
        let number = u16::try_from(position + 1).map_err(|_| {
            IsoError::TooLarge("more than 65535 directories in a path table".to_string())
        })?;
        numbers.insert(node, number);

        let identifier: &[u8] = if node == 0 {
            &[0]
        } else {
            identifiers.get(&node).copied().unwrap_or(&[0])
        };
        let parent = numbers.get(&tree.nodes[node].parent).copied().unwrap_or(1);
        let extent = layout.extents[node];

        for (out, big_endian) in [(&mut l, false), (&mut m, true)] {
            out.push(identifier.len() as u8);
            out.push(0);
            if big_endian {
                out.extend_from_slice(&extent.to_be_bytes());
                out.extend_from_slice(&parent.to_be_bytes());
            } else {
                out.extend_from_slice(&extent.to_le_bytes());
                out.extend_from_slice(&parent.to_le_bytes());
            }
            out.extend_from_slice(identifier);
            if identifier.len() % 2 == 1 {
                out.push(0);
            }
        }
    }
    Ok((l, m))
}

fn write_partial(image: &IsoImage, layout: &Layout, partial: &Path) -> IsoResult<()> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(partial)?;
    let mut out = BufWriter::new(file);

    if image.file.metadata()?.len() != image.len {
        return Err(IsoError::SourceChanged(image.path.display().to_string()));
    }
    let mut source = &image.file;
    source.seek(SeekFrom::Start(0))?;
    copy_exact(&mut source, &mut out, image.len, &image.path)?;
    pad(&mut out, image.len)?;
    let mut written = layout.source_sectors * SECTOR;

    for (staged, &extent) in image.staged.iter().zip(&layout.staged_extents) {
        if staged.len == 0 {
            continue;
        }
        debug_assert_eq!(written, extent as u64 * SECTOR);
        let mut file = File::open(&staged.source)?;
        copy_exact(&mut file, &mut out, staged.len, &staged.source)?;
        pad(&mut out, staged.len)?;
        written += sectors_for(staged.len) * SECTOR;
    }

    if let Some((_, catalog)) = &layout.catalog {
        out.write_all(&catalog.to_sector())?;
        written += SECTOR;
    }

    for hierarchy in &layout.hierarchies {
        for &node in &hierarchy.order {
            let data = serialize_directory(directory_records(&hierarchy.tree.nodes[node]))?;
            if data.len() as u32 != hierarchy.sizes[node]
                || written != hierarchy.extents[node] as u64 * SECTOR
            {
                return Err(IsoError::Malformed(format!(
                    "directory layout mismatch at sector {}",
                    hierarchy.extents[node]
                )));
            }
            out.write_all(&data)?;
            written += data.len() as u64;
        }
    }

    out.write_all(&layout.continuations)?;
    written += layout.continuations.len() as u64;

    for hierarchy in &layout.hierarchies {
        let tables = &hierarchy.path_table;
        for table in [&tables.l, &tables.m] {
            out.write_all(table)?;
            pad(&mut out, table.len() as u64)?;
            written += sectors_for(table.len() as u64) * SECTOR;
        }
    }

    if written != layout.total_sectors as u64 * SECTOR {
        return Err(IsoError::Malformed(format!(
            "wrote {} bytes, expected {}",
            written,
            layout.total_sectors as u64 * SECTOR
        )));
    }

    patch_descriptors(layout, &mut out)?;

    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    debug!("Wrote {} bytes to {}", written, partial.display());
    Ok(())
}

fn patch_descriptors<W: Write + Seek>(layout: &Layout, out: &mut W) -> IsoResult<()> {
    let mut descriptors = layout.descriptors.clone();
    let trees = [Some(descriptors.primary), descriptors.joliet];

    for (slot, hierarchy) in trees.into_iter().zip(&layout.hierarchies) {
        let Some(slot) = slot else { continue };
        let vd = &mut descriptors.all[slot];
        vd.set_root_record(&hierarchy.tree.nodes[0].dot)?;
        let tables = &hierarchy.path_table;
        vd.set_path_tables(tables.l.len() as u32, tables.l_sector, tables.m_sector);
    }
    for vd in &mut descriptors.all {
        if vd.kind() == TYPE_PRIMARY || vd.kind() == TYPE_SUPPLEMENTARY {
            vd.set_volume_space_size(layout.total_sectors);
        }
    }
    if let (Some(boot), Some((sector, _))) = (descriptors.boot, &layout.catalog) {
        descriptors.all[boot].set_boot_catalog_sector(*sector);
    }

    for vd in &descriptors.all {
        out.seek(SeekFrom::Start(vd.sector as u64 * SECTOR))?;
        out.write_all(&vd.raw)?;
    }
    out.seek(SeekFrom::End(0))?;
    out.flush()?;
    Ok(())
}

fn copy_exact<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
    path: &Path,
) -> IsoResult<()> {
    let copied = io::copy(&mut reader.take(len), writer)?;
    if copied != len {
        return Err(IsoError::SourceChanged(path.display().to_string()));
    }
    Ok(())
}

fn pad<W: Write>(out: &mut W, len: u64) -> io::Result<()> {
    let rem = (len % SECTOR) as usize;
    if rem != 0 {
        out.write_all(&vec![0u8; SECTOR_SIZE - rem])?;
    }
    Ok(())
}
