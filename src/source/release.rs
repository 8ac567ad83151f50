use anyhow::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

use crate::error::AutoinstallError;
use crate::utils::net;

const SERVER_IMAGE_PATTERN: &str = r#"href="(ubuntu-[^"]*-server[^"]*\.iso)""#;

/// `<mirror>/<version>/`.
pub fn release_url(mirror: &str, version: &str) -> Result<Url, AutoinstallError> {
    let base = format!("{}/{}/", mirror.trim_end_matches('/'), version);
    Url::parse(&base).map_err(|e| AutoinstallError::RemoteLookup(format!("{}: {}", base, e)))
}

/// First server image linked from a release directory listing.
pub fn find_server_image(listing: &str) -> Result<Option<String>, AutoinstallError> {
    let re = Regex::new(SERVER_IMAGE_PATTERN)
        .map_err(|e| AutoinstallError::RemoteLookup(format!("bad listing pattern: {}", e)))?;
    Ok(re.captures(listing).map(|c| c[1].to_string()))
}

/// Download the server image of `version` from `mirror` into `dest_dir`.
pub fn download_release(mirror: &str, version: &str, dest_dir: &Path) -> Result<PathBuf> {
    let release = release_url(mirror, version)?;
    let listing = net::fetch_text(&release)?;
    let name = find_server_image(&listing)?.ok_or_else(|| {
        AutoinstallError::RemoteLookup(format!(
            "No server image for version {} at {}",
            version, release
        ))
    })?;
    let image_url = release
        .join(&name)
        .map_err(|e| AutoinstallError::RemoteLookup(format!("{}{}: {}", release, name, e)))?;

    info!("Downloading Ubuntu Server {} ISO from {}...", version, image_url);
    net::download_file(&image_url, &image_destination(&image_url, dest_dir)?)
}

/// `dest_dir/<last segment of image_url>`.
pub fn image_destination(image_url: &Url, dest_dir: &Path) -> Result<PathBuf, AutoinstallError> {
    let name = net::filename_from_url(image_url).ok_or_else(|| {
        AutoinstallError::RemoteLookup(format!("No file name in {}", image_url))
    })?;
    Ok(dest_dir.join(name))
}
