use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::password::hash_password;
use crate::config::validation::{validate_hostname, validate_username};
use crate::error::AutoinstallError;
use crate::prompt::{InputProvider, PromptKey};

pub const DEFAULT_HOSTNAME: &str = "ubuntu-server";
pub const DEFAULT_USERNAME: &str = "ubuntu";

pub const USER_DATA_TEMPLATE: &str = concat!(
    "#cloud-config\n",
    "autoinstall:\n",
    "  version: 1\n",
    "  identity:\n",
    "    hostname: {{hostname}}\n",
    "    username: {{username}}\n",
    "    password: {{password}}\n",
);

/// The account created by the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub hostname: String,
    pub username: String,
    /// SHA-512 crypt hash, never the plain password.
    pub password: String,
}

impl Identity {
    /// Ask for hostname, username and password; blank answers take the
    /// defaults.
    pub fn ask(prompt: &mut dyn InputProvider) -> Result<Self> {
        let hostname = answer_or(
            prompt.ask(&PromptKey::Hostname, "Hostname (ENTER for default - 'ubuntu-server'): ")?,
            DEFAULT_HOSTNAME,
        );
        validate_hostname(&hostname).map_err(AutoinstallError::from)?;

        let username = answer_or(
            prompt.ask(&PromptKey::Username, "Username (ENTER for default - 'ubuntu'): ")?,
            DEFAULT_USERNAME,
        );
        validate_username(&username).map_err(AutoinstallError::from)?;

        let password =
            prompt.ask(&PromptKey::Password, "Password (ENTER for default - 'ubuntu'): ")?;
        let password = hash_password(&password)?;

        info!("User '{}' on host '{}' configured", username, hostname);
        Ok(Self {
            hostname,
            username,
            password,
        })
    }
}

fn answer_or(answer: String, default: &str) -> String {
    let answer = answer.trim();
    if answer.is_empty() {
        default.to_string()
    } else {
        answer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoinstall::password::DEFAULT_PASSWORD_HASH;
    use crate::config::validation::ValidationError;
    use crate::prompt::QueuedPrompt;

    #[test]
    fn test_defaults() {
        let mut prompt = QueuedPrompt::default();
        let identity = Identity::ask(&mut prompt).unwrap();
        assert_eq!(identity.hostname, "ubuntu-server");
        assert_eq!(identity.username, "ubuntu");
        assert_eq!(identity.password, DEFAULT_PASSWORD_HASH);
        assert_eq!(
            prompt.asked,
            vec![PromptKey::Hostname, PromptKey::Username, PromptKey::Password]
        );
    }

    #[test]
    fn test_given_values() {
        let mut prompt = QueuedPrompt::new(["node01 ", "ops", "hunter2"]);
        let identity = Identity::ask(&mut prompt).unwrap();
        assert_eq!(identity.hostname, "node01");
        assert_eq!(identity.username, "ops");
        assert!(identity.password.starts_with("$6$"));
        assert_ne!(identity.password, DEFAULT_PASSWORD_HASH);
    }

    #[test]
    fn test_invalid_hostname_is_a_validation_error() {
        let mut prompt = QueuedPrompt::new(["bad host"]);
        let err = Identity::ask(&mut prompt).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AutoinstallError>(),
            Some(AutoinstallError::Validation(ValidationError::Hostname(_)))
        ));
    }
}
