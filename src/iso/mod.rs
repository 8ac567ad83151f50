//! ISO9660 image editing.
//!
//! The editor loads the volume descriptors and directory hierarchies of an
//! existing image, applies structural edits in memory and writes a new image.
//! File data of the source is never moved: the writer copies the source
//! verbatim and appends new file extents, directories and path tables after it.

pub mod descriptor;
pub mod eltorito;
pub mod image;
pub mod record;
pub mod susp;
pub mod tree;
mod writer;

#[cfg(test)]
pub(crate) mod fixture;

use thiserror::Error;

pub use eltorito::BootEntry;
pub use image::{FileInfo, IsoImage};

/// Logical sector size used by every image this crate handles.
pub const SECTOR_SIZE: usize = 2048;

/// First sector of the volume descriptor set.
pub const DESCRIPTOR_START: u32 = 16;

#[derive(Debug, Error)]
pub enum IsoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an ISO9660 image: {0}")]
    NotIso(String),

    #[error("malformed image: {0}")]
    Malformed(String),

    #[error("no such entry in image: {0}")]
    NotFound(String),

    #[error("entry already exists in image: {0}")]
    AlreadyExists(String),

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("no free sector after the volume descriptor set (sector {0} is in use)")]
    DescriptorSetFull(u32),

    #[error("file too large for a single extent: {0}")]
    TooLarge(String),

    #[error("source file changed while writing: {0}")]
    SourceChanged(String),

    #[error("output would overwrite the source image: {0}")]
    OverwritesSource(String),
}

pub type IsoResult<T> = std::result::Result<T, IsoError>;

/// Number of sectors needed to hold `len` bytes.
pub fn sectors_for(len: u64) -> u64 {
    len.div_ceil(SECTOR_SIZE as u64)
}

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(crate) fn write_u32_both(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    out[offset + 4..offset + 8].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn push_u32_both(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn push_u16_both(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&value.to_be_bytes());
}
