use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use crate::error::AutoinstallError;

const CHUNK_SIZE: usize = 8192;

/// Fetch a page as text.
pub fn fetch_text(url: &Url) -> Result<String, AutoinstallError> {
    debug!("GET {}", url);
    let mut response = ureq::get(url.as_str())
        .call()
        .map_err(|e| AutoinstallError::RemoteLookup(format!("{}: {}", url, e)))?;
    response
        .body_mut()
        .read_to_string()
        .map_err(|e| AutoinstallError::RemoteLookup(format!("{}: {}", url, e)))
}

/// Extract the last path segment from a URL.
///
/// eg. "https://releases.ubuntu.com/22.04/ubuntu-22.04.4-live-server-amd64.iso"
/// => "ubuntu-22.04.4-live-server-amd64.iso".
pub fn filename_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_string())
}

/// `<dest>.part`, where downloads land until they complete.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Stream `url` to `dest` with a progress bar. The data is written to
/// `<dest>.part` and renamed once complete; an interrupted transfer leaves
/// the `.part` file behind.
pub fn download_file(url: &Url, dest: &Path) -> Result<PathBuf> {
    info!("Downloading {} ...", url);

    let response = ureq::get(url.as_str())
        .call()
        .map_err(|e| AutoinstallError::RemoteLookup(format!("{}: {}", url, e)))?;
    let total = response
        .headers()
        .get(ureq::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let mut reader = response.into_body().into_reader();

    let partial = partial_path(dest);
    let file = File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let mut writer = BufWriter::new(file);

    let bar = progress_bar(total);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read from {}", url))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .with_context(|| format!("Failed to write download to {}", partial.display()))?;
        bar.inc(n as u64);
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write download to {}", partial.display()))?;
    bar.finish_and_clear();

    if let Some(total) = total {
        if bar.position() != total {
            return Err(AutoinstallError::RemoteLookup(format!(
                "{}: received {} of {} bytes",
                url,
                bar.position(),
                total
            ))
            .into());
        }
    }

    fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move {} to {}", partial.display(), dest.display()))?;
    info!("Download complete: {}", dest.display());
    Ok(dest.to_path_buf())
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(len) => {
            let bar = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{bar:40} {binary_bytes}/{binary_total_bytes} ({binary_bytes_per_sec}, {eta})",
            ) {
                bar.set_style(style);
            }
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner()
                .template("{spinner} {binary_bytes} ({binary_bytes_per_sec})")
            {
                bar.set_style(style);
            }
            bar
        }
    }
}
