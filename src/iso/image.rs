use chrono::Utc;
use fs2::FileExt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::descriptor::DescriptorSet;
use super::eltorito::{BootCatalog, BootEntry};
use super::record::{record_timestamp, validate_iso_identifier, DirectoryRecord, FLAG_DIRECTORY};
use super::susp::{rock_ridge_fields, POSIX_DIR_MODE, POSIX_FILE_MODE};
use super::tree::{encode_ucs2, Entry, Hierarchy};
use super::{writer, IsoError, IsoResult, SECTOR_SIZE};

/// Longest Joliet name in UCS-2 characters.
const JOLIET_MAX_NAME: usize = 64;

/// A local file whose contents are written into the image on `write`.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub source: PathBuf,
    pub len: u64,
}

/// Where a file's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileInfo {
    /// Data already present in the source image.
    Extent { sector: u32, len: u64 },
    /// Data staged from a local file, placed by the writer.
    Staged { index: usize, len: u64 },
}

impl FileInfo {
    pub fn len(&self) -> u64 {
        match *self {
            FileInfo::Extent { len, .. } | FileInfo::Staged { len, .. } => len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ISO9660 image opened for editing.
///
/// The source file stays open, under a shared lock, until the image is
/// closed or dropped. Edits only change the in-memory model; `write`
/// produces a new image file and never touches the source.
pub struct IsoImage {
    pub(super) path: PathBuf,
    pub(super) file: File,
    pub(super) len: u64,
    pub(super) descriptors: DescriptorSet,
    pub(super) primary: Hierarchy,
    pub(super) joliet: Option<Hierarchy>,
    pub(super) catalog: Option<BootCatalog>,
    pub(super) boot_target: Option<FileInfo>,
    pub(super) staged: Vec<StagedFile>,
    stamp: [u8; 7],
}

impl IsoImage {
    pub fn open<P: AsRef<Path>>(path: P) -> IsoResult<Self> {
        let path = path.as_ref();
        info!("Opening ISO image: {}", path.display());

        let mut file = File::open(path)?;
        FileExt::lock_shared(&file)?;
        let len = file.metadata()?.len();

        let descriptors = DescriptorSet::read(&mut file)?;
        let root = descriptors.primary().root_record()?;
        if !root.is_directory() {
            return Err(IsoError::Malformed("primary root record is not a directory".to_string()));
        }
        let primary = Hierarchy::read(&mut file, &root, false, len)?;
        debug!(
            "Primary hierarchy: {} directories, Rock Ridge: {}",
            primary.nodes.len(),
            primary.rock_ridge()
        );

        let joliet = match descriptors.joliet() {
            Some(vd) => {
                let root = vd.root_record()?;
                let tree = Hierarchy::read(&mut file, &root, true, len)?;
                debug!("Joliet hierarchy: {} directories", tree.nodes.len());
                Some(tree)
            }
            None => None,
        };

        let catalog = match descriptors.boot() {
            Some(vd) => {
                let sector = vd.boot_catalog_sector();
                let mut raw = vec![0u8; SECTOR_SIZE];
                file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
                file.read_exact(&mut raw)?;
                let catalog = BootCatalog::parse(&raw)?;
                debug!("Boot catalog at sector {} with {} entries", sector, catalog.entries.len());
                Some(catalog)
            }
            None => None,
        };

        info!(
            "Opened volume '{}' ({} bytes)",
            descriptors.primary().volume_id(),
            len
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            descriptors,
            primary,
            joliet,
            catalog,
            boot_target: None,
            staged: Vec::new(),
            stamp: record_timestamp(Utc::now()),
        })
    }

    pub fn volume_id(&self) -> String {
        self.descriptors.primary().volume_id()
    }

    /// Create directory `iso_path` (e.g. `/SERVER`) with Rock Ridge and Joliet
    /// name `long_name`.
    pub fn add_directory(&mut self, iso_path: &str, long_name: &str) -> IsoResult<()> {
        let (parents, name) = split_path(iso_path)?;
        validate_iso_identifier(name, true)?;
        validate_long_name(long_name)?;

        let parent = self.primary.resolve_dir(&parents)?;
        if !self.primary.find(parent, name).is_empty() {
            return Err(IsoError::AlreadyExists(iso_path.to_string()));
        }
        let long_parents = self.long_names(&parents)?;
        let jparent = self.joliet_parent(&long_parents, long_name, iso_path)?;
        let stamp = self.stamp;

        let rock_ridge = self.primary.rock_ridge();
        let mut dot = DirectoryRecord::new(vec![0], FLAG_DIRECTORY, stamp);
        let mut dotdot = DirectoryRecord::new(vec![1], FLAG_DIRECTORY, stamp);
        let mut record = DirectoryRecord::new(name.as_bytes().to_vec(), FLAG_DIRECTORY, stamp);
        if rock_ridge {
            dot.system_use = rock_ridge_fields(None, POSIX_DIR_MODE, 2, stamp);
            dotdot.system_use = rock_ridge_fields(None, POSIX_DIR_MODE, 2, stamp);
            record.system_use = rock_ridge_fields(Some(long_name), POSIX_DIR_MODE, 2, stamp);
        }
        let node = self.primary.add_node(parent, dot.clone(), dotdot.clone());
        self.primary.insert(parent, Entry { record, child: Some(node), data: None });

        if let (Some(joliet), Some(jparent)) = (self.joliet.as_mut(), jparent) {
            let mut dot = dot;
            let mut dotdot = dotdot;
            dot.system_use.clear();
            dotdot.system_use.clear();
            let record = DirectoryRecord::new(encode_ucs2(long_name), FLAG_DIRECTORY, stamp);
            let node = joliet.add_node(jparent, dot, dotdot);
            joliet.insert(jparent, Entry { record, child: Some(node), data: None });
        }

        debug!("Added directory {} ({})", iso_path, long_name);
        Ok(())
    }

    /// Add file `iso_path` (e.g. `/SERVER/USER_DATA;1`) named `long_name` in
    /// Rock Ridge and Joliet, with the contents of the local file `source`.
    pub fn add_file(&mut self, iso_path: &str, long_name: &str, source: &Path) -> IsoResult<()> {
        let (parents, name) = split_path(iso_path)?;
        validate_iso_identifier(name, false)?;
        validate_long_name(long_name)?;

        let len = std::fs::metadata(source)?.len();
        if len > u32::MAX as u64 {
            return Err(IsoError::TooLarge(source.display().to_string()));
        }

        let parent = self.primary.resolve_dir(&parents)?;
        if !self.primary.find(parent, name).is_empty() {
            return Err(IsoError::AlreadyExists(iso_path.to_string()));
        }
        let long_parents = self.long_names(&parents)?;
        let jparent = self.joliet_parent(&long_parents, long_name, iso_path)?;

        let index = self.staged.len();
        self.staged.push(StagedFile {
            source: source.to_path_buf(),
            len,
        });
        let stamp = self.stamp;

        let mut record = DirectoryRecord::new(name.as_bytes().to_vec(), 0, stamp);
        record.data_len = len as u32;
        if self.primary.rock_ridge() {
            record.system_use = rock_ridge_fields(Some(long_name), POSIX_FILE_MODE, 1, stamp);
        }
        self.primary.insert(parent, Entry { record, child: None, data: Some(index) });

        if let (Some(joliet), Some(jparent)) = (self.joliet.as_mut(), jparent) {
            let joliet_name = if joliet.uses_versions(jparent) {
                format!("{};1", long_name)
            } else {
                long_name.to_string()
            };
            let mut record = DirectoryRecord::new(encode_ucs2(&joliet_name), 0, stamp);
            record.data_len = len as u32;
            joliet.insert(jparent, Entry { record, child: None, data: Some(index) });
        }

        debug!("Added file {} ({}, {} bytes) from {}", iso_path, long_name, len, source.display());
        Ok(())
    }

    /// Remove file `iso_path`, and its Joliet counterpart `long_name` when
    /// the image has one.
    pub fn remove_file(&mut self, iso_path: &str, long_name: &str) -> IsoResult<()> {
        let (parents, name) = split_path(iso_path)?;
        let parent = self.primary.resolve_dir(&parents)?;
        let indices: Vec<usize> = self
            .primary
            .find(parent, name)
            .into_iter()
            .filter(|&i| !self.primary.nodes[parent].entries[i].record.is_directory())
            .collect();
        if indices.is_empty() {
            return Err(IsoError::NotFound(iso_path.to_string()));
        }
        let long_parents = self.long_names(&parents)?;
        let long_parents: Vec<&str> = long_parents.iter().map(String::as_str).collect();
        self.primary.remove(parent, &indices);

        if let Some(joliet) = self.joliet.as_mut() {
            match joliet.resolve_dir(&long_parents) {
                Ok(jparent) => {
                    let indices: Vec<usize> = joliet
                        .find(jparent, long_name)
                        .into_iter()
                        .filter(|&i| !joliet.nodes[jparent].entries[i].record.is_directory())
                        .collect();
                    if indices.is_empty() {
                        debug!("No Joliet entry for {}", long_name);
                    }
                    joliet.remove(jparent, &indices);
                }
                Err(_) => debug!("No Joliet directory for {}", iso_path),
            }
        }

        debug!("Removed file {}", iso_path);
        Ok(())
    }

    /// Make `iso_path` the only El Torito boot entry. An image without a
    /// boot record gets a new record and catalog when written.
    pub fn set_boot_image(&mut self, iso_path: &str) -> IsoResult<()> {
        let info = self.lookup(iso_path)?;
        if self.catalog.is_none() {
            debug!("{} has no El Torito boot record; creating one", self.path.display());
        }
        debug!("Boot image set to {} ({:?})", iso_path, info);
        self.boot_target = Some(info);
        Ok(())
    }

    /// Locate the data of file `iso_path` in the primary hierarchy.
    pub fn lookup(&self, iso_path: &str) -> IsoResult<FileInfo> {
        let records = file_entries(&self.primary, iso_path)?;
        entry_info(&records)
    }

    /// Read file `iso_path` from the primary hierarchy.
    pub fn read_file(&self, iso_path: &str) -> IsoResult<Vec<u8>> {
        let records = file_entries(&self.primary, iso_path)?;
        self.read_entries(&records)
    }

    /// Read file `path` (long names) from the Joliet hierarchy.
    pub fn read_joliet_file(&self, path: &str) -> IsoResult<Vec<u8>> {
        let joliet = self
            .joliet
            .as_ref()
            .ok_or_else(|| IsoError::NotFound(format!("{} (image has no Joliet tree)", path)))?;
        let records = file_entries(joliet, path)?;
        self.read_entries(&records)
    }

    /// Names in directory `iso_path` of the primary hierarchy, Rock Ridge
    /// names preferred.
    pub fn list_dir(&self, iso_path: &str) -> IsoResult<Vec<String>> {
        let components: Vec<&str> = iso_path.split('/').filter(|c| !c.is_empty()).collect();
        let node = self.primary.resolve_dir(&components)?;
        Ok(self.primary.nodes[node]
            .entries
            .iter()
            .map(|e| self.primary.display_name(&e.record))
            .collect())
    }

    /// Entries of the boot catalog as found in the image.
    pub fn boot_entries(&self) -> Vec<BootEntry> {
        self.catalog
            .as_ref()
            .map(|c| c.entries.clone())
            .unwrap_or_default()
    }

    /// Write the edited image to `output`, a new file.
    pub fn write(&self, output: &Path) -> IsoResult<()> {
        writer::write_image(self, output)
    }

    /// Release the source image.
    pub fn close(self) -> IsoResult<()> {
        FileExt::unlock(&self.file)?;
        debug!("Closed ISO image: {}", self.path.display());
        Ok(())
    }

    /// Rock Ridge (or plain) names of the primary directories along `components`.
    fn long_names(&self, components: &[&str]) -> IsoResult<Vec<String>> {
        let mut node = 0;
        let mut names = Vec::with_capacity(components.len());
        for component in components {
            let entry = self
                .primary
                .find(node, component)
                .into_iter()
                .map(|i| &self.primary.nodes[node].entries[i])
                .find(|e| e.child.is_some())
                .ok_or_else(|| IsoError::NotFound(components.join("/")))?;
            names.push(self.primary.display_name(&entry.record));
            node = entry.child.unwrap_or(node);
        }
        Ok(names)
    }

    /// Joliet directory that mirrors a primary edit, checked for a free name.
    fn joliet_parent(
        &self,
        long_parents: &[String],
        long_name: &str,
        iso_path: &str,
    ) -> IsoResult<Option<usize>> {
        let Some(joliet) = self.joliet.as_ref() else {
            return Ok(None);
        };
        let components: Vec<&str> = long_parents.iter().map(String::as_str).collect();
        let jparent = joliet.resolve_dir(&components)?;
        if !joliet.find(jparent, long_name).is_empty() {
            return Err(IsoError::AlreadyExists(format!("{} (Joliet)", iso_path)));
        }
        Ok(Some(jparent))
    }

    fn read_entries(&self, entries: &[&Entry]) -> IsoResult<Vec<u8>> {
        match entry_info(entries)? {
            FileInfo::Staged { index, .. } => Ok(std::fs::read(&self.staged[index].source)?),
            FileInfo::Extent { .. } => {
                let mut data = Vec::new();
                let mut file = &self.file;
                for entry in entries {
                    let start = entry.record.extent as u64 * SECTOR_SIZE as u64;
                    let len = entry.record.data_len as u64;
                    if start + len > self.len {
                        return Err(IsoError::Malformed(format!(
                            "file extent at sector {} runs past the end of the image",
                            entry.record.extent
                        )));
                    }
                    file.seek(SeekFrom::Start(start))?;
                    file.take(len).read_to_end(&mut data)?;
                }
                Ok(data)
            }
        }
    }
}

/// The records of file `path`: one, or the extents of a multi-extent file.
fn file_entries<'a>(tree: &'a Hierarchy, path: &str) -> IsoResult<Vec<&'a Entry>> {
    let (parents, name) = split_path(path)?;
    let node = tree.resolve_dir(&parents)?;
    let mut entries = Vec::new();
    let matches = tree
        .find(node, name)
        .into_iter()
        .map(|i| &tree.nodes[node].entries[i])
        .filter(|e| !e.record.is_directory());
    for entry in matches {
        entries.push(entry);
        if !entry.record.is_multi_extent() {
            break;
        }
    }
    if entries.is_empty() {
        return Err(IsoError::NotFound(path.to_string()));
    }
    Ok(entries)
}

fn entry_info(entries: &[&Entry]) -> IsoResult<FileInfo> {
    let first = entries
        .first()
        .ok_or_else(|| IsoError::NotFound("empty entry list".to_string()))?;
    let len = entries.iter().map(|e| e.record.data_len as u64).sum();
    Ok(match first.data {
        Some(index) => FileInfo::Staged { index, len },
        None => FileInfo::Extent {
            sector: first.record.extent,
            len,
        },
    })
}

/// Split `/A/B/C` into (`[A, B]`, `C`).
fn split_path(path: &str) -> IsoResult<(Vec<&str>, &str)> {
    let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let name = components.pop().ok_or_else(|| IsoError::InvalidName {
        name: path.to_string(),
        reason: "path has no components".to_string(),
    })?;
    Ok((components, name))
}

fn validate_long_name(name: &str) -> IsoResult<()> {
    let invalid = |reason: &str| IsoError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() || name == "." || name == ".." {
        return Err(invalid("empty or reserved name"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(invalid("contains '/' or NUL"));
    }
    if name.encode_utf16().count() > JOLIET_MAX_NAME {
        return Err(invalid("longer than 64 characters"));
    }
    Ok(())
}
