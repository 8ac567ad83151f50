//! The `user-data` and `meta-data` files read by cloud-init's NoCloud source.

use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub mod identity;
pub mod password;
pub mod ssh;

use crate::error::AutoinstallError;
use crate::prompt::{InputProvider, PromptKey};
use crate::utils::TemplateEngine;
use identity::{Identity, USER_DATA_TEMPLATE};
use ssh::SSH_TEMPLATE;

/// Configuration files to inject, held in memory until staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub user_data: Vec<u8>,
    /// Always empty.
    pub meta_data: Vec<u8>,
    /// The document was generated rather than supplied by the user.
    pub synthesized: bool,
}

pub struct Materializer {
    templates: TemplateEngine,
}

impl Materializer {
    pub fn new() -> Result<Self> {
        let mut templates = TemplateEngine::new();
        templates.register_template("user-data", USER_DATA_TEMPLATE)?;
        templates.register_template("ssh", SSH_TEMPLATE)?;
        Ok(Self { templates })
    }

    /// Copy `config` verbatim, or generate a document from prompted values
    /// with an optional SSH key.
    pub fn materialize(
        &self,
        config: Option<&Path>,
        ssh_key: Option<&Path>,
        prompt: &mut dyn InputProvider,
    ) -> Result<Payload> {
        match config {
            Some(path) => self.copy_config(path, ssh_key),
            None => {
                info!("No config file provided. Generating one.");
                self.generate(ssh_key, prompt)
            }
        }
    }

    fn copy_config(&self, path: &Path, ssh_key: Option<&Path>) -> Result<Payload> {
        if !path.is_file() {
            let message = format!("Config file not found: {}", path.display());
            return Err(AutoinstallError::NotFound(message).into());
        }
        let user_data = fs::read(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        if let Some(key) = ssh_key {
            warn!(
                "Ignoring SSH key {}: a provided config file is used unchanged",
                key.display()
            );
        }

        info!("Using provided config file: {}", path.display());
        Ok(Payload {
            user_data,
            meta_data: Vec::new(),
            synthesized: false,
        })
    }

    fn generate(&self, ssh_key: Option<&Path>, prompt: &mut dyn InputProvider) -> Result<Payload> {
        let identity = Identity::ask(prompt)?;
        let mut document = self.templates.render_registered("user-data", &identity)?;

        let key_path = match ssh_key {
            Some(path) => Some(path.to_path_buf()),
            None => ask_key_path(prompt)?,
        };
        match key_path {
            Some(path) => match ssh::load_key(&path) {
                Ok(key) => {
                    let ssh = self.templates.render_registered("ssh", &json!({ "key": key }))?;
                    document.push_str(&ssh);
                    info!("SSH public key added from {}", path.display());
                }
                Err(e) if !e.is_fatal() => warn!("{}. Skipping...", e),
                Err(e) => return Err(e.into()),
            },
            None => info!("Skipping ssh key configuration."),
        }

        info!("User-data config generated");
        Ok(Payload {
            user_data: document.into_bytes(),
            meta_data: Vec::new(),
            synthesized: true,
        })
    }
}

fn ask_key_path(prompt: &mut dyn InputProvider) -> Result<Option<PathBuf>> {
    if !prompt.confirm(&PromptKey::IncludeSshKey, "Do you want to include an ssh key? (Y/N): ")? {
        return Ok(None);
    }
    let path = prompt.ask(
        &PromptKey::SshKeyPath,
        "Enter path to your public ssh key (e.g. /home/user/.ssh/id_rsa.pub): ",
    )?;
    let path = path.trim();
    Ok((!path.is_empty()).then(|| PathBuf::from(path)))
}
