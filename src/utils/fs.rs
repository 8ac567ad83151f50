use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const REMOVE_ATTEMPTS: u32 = 3;

/// The directory where payload files are staged before injection.
pub struct FileSystemManager {
    working_dir: PathBuf,
    created: bool,
}

impl FileSystemManager {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            created: false,
        }
    }

    /// A fresh `isoforge-<uuid>` directory under the system temp dir.
    pub fn temporary() -> Self {
        Self::new(std::env::temp_dir().join(format!("isoforge-{}", uuid::Uuid::new_v4())))
    }

    /// Create the working directory unless it exists. Existing contents are
    /// left alone.
    pub fn create_working_directory(&mut self) -> Result<()> {
        if self.working_dir.is_dir() {
            debug!("Using existing working directory: {}", self.working_dir.display());
            return Ok(());
        }

        info!("Creating working directory: {}", self.working_dir.display());
        std::fs::create_dir_all(&self.working_dir).with_context(|| {
            format!(
                "Failed to create working directory: {}",
                self.working_dir.display()
            )
        })?;
        self.created = true;
        Ok(())
    }

    pub fn get_working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn get_temp_path(&self, name: &str) -> PathBuf {
        self.working_dir.join(name)
    }

    /// Write `content` to `name` inside the working directory.
    pub fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.get_temp_path(name);
        debug!("Writing file: {}", path.display());
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write file: {}", path.display()))?;
        Ok(path)
    }

    /// Remove a staged file, retrying briefly on failure. A file that is
    /// already gone counts as removed.
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        let mut attempts = 0;
        loop {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    attempts += 1;
                    if attempts >= REMOVE_ATTEMPTS {
                        return Err(anyhow::anyhow!(
                            "Failed to remove {} after {} attempts: {}",
                            path.display(),
                            REMOVE_ATTEMPTS,
                            e
                        ));
                    }
                    warn!("Removing {} failed, retrying: {}", path.display(), e);
                    std::thread::sleep(std::time::Duration::from_millis(200));
                }
            }
        }
    }

    /// Remove the working directory if this manager created it and nothing
    /// is left in it.
    pub fn cleanup(&self) -> Result<()> {
        if !self.created || !self.working_dir.is_dir() {
            return Ok(());
        }
        let empty = std::fs::read_dir(&self.working_dir)
            .with_context(|| format!("Failed to read directory: {}", self.working_dir.display()))?
            .next()
            .is_none();
        if empty {
            std::fs::remove_dir(&self.working_dir).with_context(|| {
                format!(
                    "Failed to remove working directory: {}",
                    self.working_dir.display()
                )
            })?;
            debug!("Removed working directory {}", self.working_dir.display());
        } else {
            info!("Keeping working directory: {}", self.working_dir.display());
        }
        Ok(())
    }
}
