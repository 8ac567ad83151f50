use clap::Parser;
use std::path::PathBuf;

use crate::config::{DEFAULT_MIRROR, DEFAULT_TIMEOUT};

/// Build an unattended Ubuntu Server installer image.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "isoforge", disable_version_flag = true)]
pub struct Cli {
    /// The path to the original ISO image (downloaded from the release mirror if omitted)
    #[arg(short, long)]
    pub iso: Option<PathBuf>,

    /// The Ubuntu Server release to download (default 22.04)
    #[arg(short, long)]
    pub version: Option<String>,

    /// The output image path or directory (default: current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// The path to a user-data config file (generated if omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// The public SSH key to authorize in the generated config
    #[arg(short, long)]
    pub ssh: Option<PathBuf>,

    /// The bootloader menu timeout in seconds (-1 waits for a key press)
    #[arg(short = 't', long, default_value_t = DEFAULT_TIMEOUT, allow_negative_numbers = true)]
    pub time: i32,

    /// Release mirror base URL
    #[arg(long, default_value = DEFAULT_MIRROR)]
    pub mirror: String,

    /// Directory searched for existing Ubuntu ISOs
    #[arg(long, default_value = ".")]
    pub search_dir: PathBuf,

    /// Directory for the staged user-data, meta-data and grub.cfg
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// JSON file answering the interactive questions
    #[arg(long)]
    pub answers: Option<PathBuf>,

    /// Never prompt; unanswered questions take their defaults
    #[arg(long)]
    pub non_interactive: bool,

    /// Write a SHA-256 checksum file next to the output image
    #[arg(long)]
    pub checksum: bool,

    #[arg(long)]
    pub verbose: bool,
}
