use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct ChecksumVerifier;

impl ChecksumVerifier {
    pub fn new() -> Self {
        Self
    }

    /// SHA-256 of in-memory data, as lowercase hex.
    pub fn sha256_bytes(&self, data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// SHA-256 of a file, as lowercase hex.
    pub fn sha256_file(&self, file_path: &Path) -> Result<String> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let mut reader = BufReader::new(file);
        let mut buffer = vec![0; 8192];
        let mut hasher = Sha256::new();
        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .context("Failed to read file data")?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Compare `data` against `expected` content.
    pub fn verify_bytes(&self, what: &str, data: &[u8], expected: &[u8]) -> Result<()> {
        let calculated = self.sha256_bytes(data);
        let expected = self.sha256_bytes(expected);
        debug!("{}: expected {}, calculated {}", what, expected, calculated);

        if calculated == expected {
            Ok(())
        } else {
            Err(anyhow!(
                "Checksum mismatch for {}\nExpected: {}\nCalculated: {}",
                what,
                expected,
                calculated
            ))
        }
    }

    /// Write `<file>.sha256` next to `file_path` in `sha256sum` format.
    pub fn generate_checksum_file(&self, file_path: &Path) -> Result<PathBuf> {
        let checksum = self.sha256_file(file_path)?;
        let file_name = file_path
            .file_name()
            .ok_or_else(|| anyhow!("Not a file path: {}", file_path.display()))?
            .to_string_lossy()
            .into_owned();
        let checksum_path = file_path.with_file_name(format!("{}.sha256", file_name));

        let content = format!("{}  {}\n", checksum, file_name);
        std::fs::write(&checksum_path, content).with_context(|| {
            format!("Failed to write checksum file: {}", checksum_path.display())
        })?;

        info!("Generated checksum file: {}", checksum_path.display());
        Ok(checksum_path)
    }
}

impl Default for ChecksumVerifier {
    fn default() -> Self {
        Self::new()
    }
}
