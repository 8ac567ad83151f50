//! Post-write checks on the output image.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing::{debug, info};

use super::modifier::{GRUB_CFG_PATH, META_DATA_PATH, StagedPayload, USER_DATA_PATH};
use crate::iso::{FileInfo, IsoImage};
use crate::utils::ChecksumVerifier;

pub struct OutputVerifier {
    checksums: ChecksumVerifier,
}

impl OutputVerifier {
    pub fn new() -> Self {
        Self {
            checksums: ChecksumVerifier::new(),
        }
    }

    /// Reopen `output` and check that the injected files match the staged
    /// ones and that the boot entry loads the new GRUB configuration.
    pub fn verify(&self, output: &Path, staged: &StagedPayload) -> Result<()> {
        info!("Verifying output image: {}", output.display());
        let image = IsoImage::open(output)
            .with_context(|| format!("Failed to reopen output image: {}", output.display()))?;

        for (iso_path, local) in [
            (USER_DATA_PATH, &staged.user_data),
            (META_DATA_PATH, &staged.meta_data),
            (GRUB_CFG_PATH, &staged.grub_cfg),
        ] {
            let injected = image
                .read_file(iso_path)
                .with_context(|| format!("Failed to read {} from output image", iso_path))?;
            let expected = std::fs::read(local)
                .with_context(|| format!("Failed to read staged file: {}", local.display()))?;
            self.checksums.verify_bytes(iso_path, &injected, &expected)?;
        }

        let sector = match image.lookup(GRUB_CFG_PATH)? {
            FileInfo::Extent { sector, .. } => sector,
            FileInfo::Staged { .. } => {
                return Err(anyhow!("{} has no extent in the output image", GRUB_CFG_PATH))
            }
        };
        let entries = image.boot_entries();
        match entries.as_slice() {
            [entry] if entry.load_rba == sector => {
                debug!("Boot entry loads sector {}", sector);
            }
            [entry] => {
                return Err(anyhow!(
                    "Boot entry loads sector {}, expected {} ({})",
                    entry.load_rba,
                    sector,
                    GRUB_CFG_PATH
                ))
            }
            _ => return Err(anyhow!("Expected exactly one boot entry, found {}", entries.len())),
        }

        image.close()?;
        info!("✓ Output image verified");
        Ok(())
    }
}

impl Default for OutputVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::modifier::IsoModifier;
    use crate::iso::fixture;

    fn stage(dir: &Path) -> StagedPayload {
        let staged = StagedPayload {
            user_data: dir.join("user-data"),
            meta_data: dir.join("meta-data"),
            grub_cfg: dir.join("grub.cfg"),
        };
        std::fs::write(&staged.user_data, b"#cloud-config\n").unwrap();
        std::fs::write(&staged.meta_data, b"").unwrap();
        std::fs::write(&staged.grub_cfg, b"set timeout=7\n").unwrap();
        staged
    }

    #[test]
    fn test_verify_modified_image() {
        let dir = tempfile::tempdir().unwrap();
        let options = fixture::Options { joliet: true, ..Default::default() };
        let source = fixture::build(dir.path(), options).unwrap();
        let staged = stage(dir.path());
        let output = dir.path().join("output.iso");
        IsoModifier::new().modify(&source, &staged, &output).unwrap();

        OutputVerifier::new().verify(&output, &staged).unwrap();
    }

    #[test]
    fn test_verify_image_from_source_without_boot_record() {
        let dir = tempfile::tempdir().unwrap();
        let options = fixture::Options { el_torito: false, ..Default::default() };
        let source = fixture::build(dir.path(), options).unwrap();
        let staged = stage(dir.path());
        let output = dir.path().join("output.iso");
        IsoModifier::new().modify(&source, &staged, &output).unwrap();

        OutputVerifier::new().verify(&output, &staged).unwrap();
    }

    #[test]
    fn test_verify_detects_changed_payload() {
        let dir = tempfile::tempdir().unwrap();
        let options = fixture::Options { joliet: false, ..Default::default() };
        let source = fixture::build(dir.path(), options).unwrap();
        let staged = stage(dir.path());
        let output = dir.path().join("output.iso");
        IsoModifier::new().modify(&source, &staged, &output).unwrap();

        std::fs::write(&staged.user_data, b"#cloud-config\nchanged: true\n").unwrap();
        assert!(OutputVerifier::new().verify(&output, &staged).is_err());
    }

    #[test]
    fn test_verify_rejects_unmodified_source() {
        let dir = tempfile::tempdir().unwrap();
        let options = fixture::Options { joliet: false, ..Default::default() };
        let source = fixture::build(dir.path(), options).unwrap();
        let staged = stage(dir.path());
        assert!(OutputVerifier::new().verify(&source, &staged).is_err());
    }
}
