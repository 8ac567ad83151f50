use regex::Regex;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::Settings;

/// `-1` keeps the menu open until a key is pressed.
pub const MIN_TIMEOUT: i32 = -1;
pub const MAX_TIMEOUT: i32 = 3600;

const HOSTNAME_PATTERN: &str = r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$";
const USERNAME_PATTERN: &str = r"^[a-z_][a-z0-9_-]{0,30}\$?$";
const VERSION_PATTERN: &str = r"^(\d{2}\.\d{2}(\.\d+)?|[a-z]+)$";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "Invalid hostname '{0}': expected an RFC 1123 label \
         (letters, digits and '-', at most 63 characters)"
    )]
    Hostname(String),

    #[error("Invalid username '{0}': expected a POSIX login name")]
    Username(String),

    #[error("Invalid release version '{0}': expected a form like 22.04, 22.04.4 or jammy")]
    Version(String),

    #[error("Invalid mirror URL '{0}': {1}")]
    Mirror(String, String),

    #[error("Bootloader timeout {0} is out of range (-1..=3600 seconds)")]
    Timeout(i32),

    #[error("Invalid pattern {0}: {1}")]
    Pattern(&'static str, String),
}

fn matches(pattern: &'static str, value: &str) -> Result<bool, ValidationError> {
    let re = Regex::new(pattern).map_err(|e| ValidationError::Pattern(pattern, e.to_string()))?;
    Ok(re.is_match(value))
}

/// Check the values taken from the command line and answers file.
pub fn validate_settings(settings: &Settings) -> Result<(), ValidationError> {
    debug!("Validating settings");

    if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&settings.timeout) {
        return Err(ValidationError::Timeout(settings.timeout));
    }
    if let Some(version) = &settings.version {
        validate_version(version)?;
    }
    validate_mirror(&settings.mirror)?;

    debug!("Settings validation passed");
    Ok(())
}

pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if matches(HOSTNAME_PATTERN, hostname)? {
        Ok(())
    } else {
        Err(ValidationError::Hostname(hostname.to_string()))
    }
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if matches(USERNAME_PATTERN, username)? {
        Ok(())
    } else {
        Err(ValidationError::Username(username.to_string()))
    }
}

pub fn validate_version(version: &str) -> Result<(), ValidationError> {
    if matches(VERSION_PATTERN, version)? {
        Ok(())
    } else {
        Err(ValidationError::Version(version.to_string()))
    }
}

pub fn validate_mirror(mirror: &str) -> Result<(), ValidationError> {
    let url = Url::parse(mirror)
        .map_err(|e| ValidationError::Mirror(mirror.to_string(), e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ValidationError::Mirror(
            mirror.to_string(),
            format!("unsupported scheme '{}'", scheme),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ubuntu-server", true)]
    #[case("node01", true)]
    #[case("a", true)]
    #[case("-leading", false)]
    #[case("trailing-", false)]
    #[case("has space", false)]
    #[case("dotted.name", false)]
    #[case("", false)]
    fn test_hostnames(#[case] hostname: &str, #[case] valid: bool) {
        assert_eq!(validate_hostname(hostname).is_ok(), valid);
    }

    #[test]
    fn test_hostname_length_limit() {
        assert!(validate_hostname(&"a".repeat(63)).is_ok());
        assert!(validate_hostname(&"a".repeat(64)).is_err());
    }

    #[rstest]
    #[case("ubuntu", true)]
    #[case("_svc", true)]
    #[case("deploy-bot", true)]
    #[case("Ubuntu", false)]
    #[case("1user", false)]
    #[case("user name", false)]
    fn test_usernames(#[case] username: &str, #[case] valid: bool) {
        assert_eq!(validate_username(username).is_ok(), valid);
    }

    #[rstest]
    #[case("22.04", true)]
    #[case("24.04.1", true)]
    #[case("jammy", true)]
    #[case("noble", true)]
    #[case("Jammy", false)]
    #[case("22", false)]
    #[case("22.04-beta", false)]
    fn test_versions(#[case] version: &str, #[case] valid: bool) {
        assert_eq!(validate_version(version).is_ok(), valid);
    }

    #[test]
    fn test_mirror_scheme() {
        assert!(validate_mirror("https://releases.ubuntu.com").is_ok());
        assert!(validate_mirror("http://mirror.example.org/ubuntu-releases").is_ok());
        assert!(matches!(
            validate_mirror("ftp://mirror.example.org"),
            Err(ValidationError::Mirror(..))
        ));
        assert!(validate_mirror("not a url").is_err());
    }

    #[test]
    fn test_timeout_range() {
        let mut settings = Settings::default();
        settings.timeout = MAX_TIMEOUT;
        assert!(validate_settings(&settings).is_ok());
        settings.timeout = MAX_TIMEOUT + 1;
        assert_eq!(
            validate_settings(&settings),
            Err(ValidationError::Timeout(MAX_TIMEOUT + 1))
        );
    }

    #[test]
    fn test_timeout_wait_forever() {
        let mut settings = Settings::default();
        settings.timeout = -1;
        assert!(validate_settings(&settings).is_ok());
        settings.timeout = -2;
        assert_eq!(validate_settings(&settings), Err(ValidationError::Timeout(-2)));
    }
}
