use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::modifier::{IsoModifier, StagedPayload};
use super::verify::OutputVerifier;
use crate::autoinstall::{Materializer, Payload};
use crate::boot;
use crate::config::Settings;
use crate::error::AutoinstallError;
use crate::prompt::InputProvider;
use crate::source::SourceResolver;
use crate::utils::{checksum::ChecksumVerifier, fs::FileSystemManager};

/// File name used when the output is a directory or not given.
pub const DEFAULT_OUTPUT_NAME: &str = "output.iso";

pub struct Builder {
    settings: Settings,
    prompt: Box<dyn InputProvider>,
    materializer: Materializer,
    iso_modifier: IsoModifier,
    output_verifier: OutputVerifier,
    fs_manager: FileSystemManager,
    checksum_verifier: ChecksumVerifier,
}

impl Builder {
    pub fn new(settings: Settings, prompt: Box<dyn InputProvider>) -> Result<Self> {
        let fs_manager = match &settings.work_dir {
            Some(dir) => FileSystemManager::new(dir.clone()),
            None => FileSystemManager::temporary(),
        };

        Ok(Self {
            settings,
            prompt,
            materializer: Materializer::new()?,
            iso_modifier: IsoModifier::new(),
            output_verifier: OutputVerifier::new(),
            fs_manager,
            checksum_verifier: ChecksumVerifier::new(),
        })
    }

    /// Run the whole pipeline and return the path of the written image.
    pub fn build(&mut self) -> Result<PathBuf> {
        info!("Starting ISO build process");

        // Step 1: Decide where the image goes before doing any work
        let output = resolve_output_path(self.settings.output.as_deref())?;
        info!("Output image: {}", output.display());

        // Step 2: Locate or download the source image
        let dest_dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let resolver =
            SourceResolver::new(&self.settings.search_dir, dest_dir, &self.settings.mirror);
        let source = resolver.resolve(
            self.settings.iso.as_deref(),
            self.settings.version(),
            self.prompt.as_mut(),
        )?;

        // Step 3: Produce user-data and meta-data
        let payload = self.materializer.materialize(
            self.settings.config.as_deref(),
            self.settings.ssh_key.as_deref(),
            self.prompt.as_mut(),
        )?;

        // Step 4: Bootloader menu
        let grub = boot::generate(self.settings.timeout)?;

        // Step 5: Stage, inject and verify; cleanup runs whatever happens
        self.fs_manager
            .create_working_directory()
            .context("Failed to create working directory")?;
        let staged = self.staged_paths();
        let result = self.assemble(&source, &payload, &grub, &staged, &output);
        self.cleanup(&staged, payload.synthesized);

        let output = result?;
        info!("ISO build completed successfully: {}", output.display());
        Ok(output)
    }

    fn staged_paths(&self) -> StagedPayload {
        StagedPayload {
            user_data: self.fs_manager.get_temp_path("user-data"),
            meta_data: self.fs_manager.get_temp_path("meta-data"),
            grub_cfg: self.fs_manager.get_temp_path("grub.cfg"),
        }
    }

    fn assemble(
        &self,
        source: &Path,
        payload: &Payload,
        grub: &str,
        staged: &StagedPayload,
        output: &Path,
    ) -> Result<PathBuf> {
        self.fs_manager.write_file("user-data", &payload.user_data)?;
        self.fs_manager.write_file("meta-data", &payload.meta_data)?;
        self.fs_manager.write_file("grub.cfg", grub.as_bytes())?;
        debug!("Payload staged in {}", self.fs_manager.get_working_dir().display());

        let output = self.iso_modifier.modify(source, staged, output)?;
        self.output_verifier.verify(&output, staged)?;

        if self.settings.checksum {
            self.checksum_verifier
                .generate_checksum_file(&output)
                .context("Failed to write checksum file")?;
        }
        Ok(output)
    }

    /// Remove transient files. A staged copy of a user-supplied config is
    /// kept.
    fn cleanup(&self, staged: &StagedPayload, synthesized_user_data: bool) {
        info!("Cleaning up temporary files...");
        let mut transient = vec![&staged.meta_data, &staged.grub_cfg];
        if synthesized_user_data {
            transient.push(&staged.user_data);
        }
        for path in transient {
            if let Err(e) = self.fs_manager.remove_file(path) {
                warn!("Failed to clean up {}: {:#}", path.display(), e);
            }
        }
        if let Err(e) = self.fs_manager.cleanup() {
            warn!("Failed to clean up working directory: {:#}", e);
        }
    }
}

/// Where the output image is written: `output.iso` in the current
/// directory when unset, `<dir>/output.iso` for an existing directory, or
/// a `.iso` path whose parent exists.
pub fn resolve_output_path(output: Option<&Path>) -> Result<PathBuf> {
    let Some(path) = output else {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        return Ok(cwd.join(DEFAULT_OUTPUT_NAME));
    };

    if path.is_dir() {
        return Ok(path.join(DEFAULT_OUTPUT_NAME));
    }

    let is_iso = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("iso"));
    let parent_exists = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
        _ => true,
    };
    if is_iso && parent_exists {
        return Ok(path.to_path_buf());
    }

    Err(AutoinstallError::NotFound(format!("Output path not found: {}", path.display())).into())
}
