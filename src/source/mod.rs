//! Locating the installer image to start from.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub mod release;

use crate::error::AutoinstallError;
use crate::prompt::{InputProvider, PromptKey};

pub struct SourceResolver<'a> {
    search_dir: &'a Path,
    dest_dir: &'a Path,
    mirror: &'a str,
}

impl<'a> SourceResolver<'a> {
    /// Candidates are looked for in `search_dir`; downloads from `mirror`
    /// land in `dest_dir`.
    pub fn new(search_dir: &'a Path, dest_dir: &'a Path, mirror: &'a str) -> Self {
        Self {
            search_dir,
            dest_dir,
            mirror,
        }
    }

    /// Return a local image: `explicit` when given, else a confirmed local
    /// candidate, else a download of `version`.
    pub fn resolve(
        &self,
        explicit: Option<&Path>,
        version: &str,
        prompt: &mut dyn InputProvider,
    ) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if !path.is_file() {
                let message = format!("ISO not found: {}", path.display());
                return Err(AutoinstallError::NotFound(message).into());
            }
            info!("Using provided ISO: {}", path.display());
            return Ok(path.to_path_buf());
        }

        info!(
            "No ISO path provided. Checking for existing ISOs in {}...",
            self.search_dir.display()
        );
        if let Some(found) = self.find_local(prompt)? {
            info!("Using found ISO: {}", found.display());
            return Ok(found);
        }

        info!("No local ISO selected. Fetching Ubuntu Server {}...", version);
        release::download_release(self.mirror, version, self.dest_dir)
    }

    fn find_local(&self, prompt: &mut dyn InputProvider) -> Result<Option<PathBuf>> {
        for path in local_candidates(self.search_dir)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            info!("Found already existing ISO: {}", name);
            let question = format!("Do you want to use {}? (Y/N): ", name);
            if prompt.confirm(&PromptKey::UseLocalIso(name), &question)? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// Files in `dir` whose name contains `ubuntu` and ends in `.iso`, by name.
pub fn local_candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut candidates = Vec::new();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains("ubuntu") && name.ends_with(".iso") && entry.file_type()?.is_file() {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::QueuedPrompt;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"iso").unwrap();
        path
    }

    #[test]
    fn test_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let iso = touch(dir.path(), "custom.iso");
        let resolver = SourceResolver::new(dir.path(), dir.path(), "http://127.0.0.1:9");
        let mut prompt = QueuedPrompt::default();

        assert_eq!(resolver.resolve(Some(&iso), "22.04", &mut prompt).unwrap(), iso);
        assert!(prompt.asked.is_empty());

        let err = resolver
            .resolve(Some(&dir.path().join("missing.iso")), "22.04", &mut prompt)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AutoinstallError>(),
            Some(AutoinstallError::NotFound(_))
        ));
    }

    #[test]
    fn test_candidates_are_filtered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ubuntu-24.04-live-server-amd64.iso");
        touch(dir.path(), "ubuntu-22.04-live-server-amd64.iso");
        touch(dir.path(), "debian-12.iso");
        touch(dir.path(), "ubuntu-notes.txt");
        fs::create_dir(dir.path().join("ubuntu-dir.iso")).unwrap();

        let names: Vec<String> = local_candidates(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["ubuntu-22.04-live-server-amd64.iso", "ubuntu-24.04-live-server-amd64.iso"]
        );
    }

    #[test]
    fn test_first_confirmed_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ubuntu-a.iso");
        let second = touch(dir.path(), "ubuntu-b.iso");
        touch(dir.path(), "ubuntu-c.iso");

        let resolver = SourceResolver::new(dir.path(), dir.path(), "http://127.0.0.1:9");
        let mut prompt = QueuedPrompt::new(["n", "Y", "y"]);
        assert_eq!(resolver.resolve(None, "22.04", &mut prompt).unwrap(), second);
        assert_eq!(prompt.asked.len(), 2);
    }

    #[test]
    fn test_declined_candidates_fall_through_to_download() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ubuntu-a.iso");

        let resolver = SourceResolver::new(dir.path(), dir.path(), "http://127.0.0.1:9");
        let mut prompt = QueuedPrompt::new(["yes"]);
        let err = resolver.resolve(None, "22.04", &mut prompt).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AutoinstallError>(),
            Some(AutoinstallError::RemoteLookup(_))
        ));
    }
}
