use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod validation;

use crate::cli::Cli;

pub const DEFAULT_VERSION: &str = "22.04";
pub const DEFAULT_MIRROR: &str = "https://releases.ubuntu.com";
pub const DEFAULT_TIMEOUT: i32 = 10;

/// Everything a run needs, built once from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Explicit source image.
    pub iso: Option<PathBuf>,
    /// Release to download when no local image is used.
    pub version: Option<String>,
    pub output: Option<PathBuf>,
    /// User-supplied autoinstall document, copied verbatim.
    pub config: Option<PathBuf>,
    pub ssh_key: Option<PathBuf>,
    /// Bootloader menu timeout in seconds; `-1` waits for a key press.
    pub timeout: i32,
    pub mirror: String,
    /// Directory scanned for local candidate images.
    pub search_dir: PathBuf,
    /// Where payload files are staged. A fresh temporary directory when unset.
    pub work_dir: Option<PathBuf>,
    pub answers: Option<PathBuf>,
    pub non_interactive: bool,
    /// Write `<output>.sha256` next to the image.
    pub checksum: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            iso: None,
            version: None,
            output: None,
            config: None,
            ssh_key: None,
            timeout: DEFAULT_TIMEOUT,
            mirror: DEFAULT_MIRROR.to_string(),
            search_dir: PathBuf::from("."),
            work_dir: None,
            answers: None,
            non_interactive: false,
            checksum: false,
        }
    }
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let settings = Self {
            iso: cli.iso.clone(),
            version: cli.version.clone(),
            output: cli.output.clone(),
            config: cli.config.clone(),
            ssh_key: cli.ssh.clone(),
            timeout: cli.time,
            mirror: cli.mirror.clone(),
            search_dir: cli.search_dir.clone(),
            work_dir: cli.work_dir.clone(),
            answers: cli.answers.clone(),
            non_interactive: cli.non_interactive,
            checksum: cli.checksum,
        };

        validation::validate_settings(&settings).context("Invalid command line arguments")?;
        debug!("Settings: {:#?}", settings);
        Ok(settings)
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }
}

/// Pre-recorded answers to the interactive questions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Answers {
    /// Accept local candidate images found in the search directory.
    pub use_local_iso: Option<bool>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    /// Plain-text password, hashed before it reaches the document.
    pub password: Option<String>,
    pub include_ssh_key: Option<bool>,
    pub ssh_key_path: Option<PathBuf>,
}

/// Load an answers file.
pub fn load_answers<P: AsRef<Path>>(path: P) -> Result<Answers> {
    let path = path.as_ref();
    info!("Loading answers from {}", path.display());

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read answers file: {}", path.display()))?;

    let answers: Answers = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse JSON in answers file: {}", path.display()))?;

    if let Some(hostname) = &answers.hostname {
        validation::validate_hostname(hostname)
            .with_context(|| format!("Invalid answers file: {}", path.display()))?;
    }
    if let Some(username) = &answers.username {
        validation::validate_username(username)
            .with_context(|| format!("Invalid answers file: {}", path.display()))?;
    }

    debug!("Loaded answers: hostname={:?}, username={:?}", answers.hostname, answers.username);
    Ok(answers)
}
