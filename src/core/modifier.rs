use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::AutoinstallError;
use crate::iso::IsoImage;

pub const SERVER_DIR: &str = "/SERVER";
pub const SERVER_DIR_NAME: &str = "server";
pub const USER_DATA_PATH: &str = "/SERVER/USER_DATA;1";
pub const USER_DATA_NAME: &str = "user-data";
pub const META_DATA_PATH: &str = "/SERVER/META_DATA;1";
pub const META_DATA_NAME: &str = "meta-data";
pub const GRUB_CFG_PATH: &str = "/BOOT/GRUB/GRUB.CFG;1";
pub const GRUB_CFG_NAME: &str = "grub.cfg";

/// Payload files staged on disk, ready for injection.
#[derive(Debug, Clone)]
pub struct StagedPayload {
    pub user_data: PathBuf,
    pub meta_data: PathBuf,
    pub grub_cfg: PathBuf,
}

pub struct IsoModifier;

impl IsoModifier {
    pub fn new() -> Self {
        Self
    }

    /// Inject the staged files into a copy of `source` written to `output`.
    pub fn modify(&self, source: &Path, staged: &StagedPayload, output: &Path) -> Result<PathBuf> {
        info!("Applying modifications to ISO: {}", source.display());

        let mut image = IsoImage::open(source).map_err(|source_err| AutoinstallError::ImageOpen {
            path: source.to_path_buf(),
            source: source_err,
        })?;

        image
            .add_directory(SERVER_DIR, SERVER_DIR_NAME)
            .map_err(AutoinstallError::edit(format!("add {}", SERVER_DIR)))?;
        image
            .add_file(USER_DATA_PATH, USER_DATA_NAME, &staged.user_data)
            .map_err(AutoinstallError::edit(format!("add {}", USER_DATA_PATH)))?;
        image
            .add_file(META_DATA_PATH, META_DATA_NAME, &staged.meta_data)
            .map_err(AutoinstallError::edit(format!("add {}", META_DATA_PATH)))?;
        info!("Added autoinstall configuration under {}", SERVER_DIR);

        image
            .remove_file(GRUB_CFG_PATH, GRUB_CFG_NAME)
            .map_err(AutoinstallError::edit(format!("remove {}", GRUB_CFG_PATH)))?;
        image
            .add_file(GRUB_CFG_PATH, GRUB_CFG_NAME, &staged.grub_cfg)
            .map_err(AutoinstallError::edit(format!("add {}", GRUB_CFG_PATH)))?;
        image
            .set_boot_image(GRUB_CFG_PATH)
            .map_err(AutoinstallError::edit(format!("set boot image {}", GRUB_CFG_PATH)))?;
        info!("Replaced bootloader configuration");

        image.write(output).map_err(|source_err| AutoinstallError::ImageWrite {
            path: output.to_path_buf(),
            source: source_err,
        })?;
        image.close().map_err(|source_err| AutoinstallError::ImageWrite {
            path: output.to_path_buf(),
            source: source_err,
        })?;

        info!("Modified ISO written to {}", output.display());
        Ok(output.to_path_buf())
    }
}

impl Default for IsoModifier {
    fn default() -> Self {
        Self::new()
    }
}
