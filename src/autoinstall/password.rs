//! SHA-512 crypt (`$6$`) password hashes as read by `/etc/shadow`.

use anyhow::{anyhow, Result};
use ring::rand::{SecureRandom, SystemRandom};
use sha_crypt::{sha512_crypt_b64, Sha512Params};

/// Hash of `ubuntu` used when no password is given.
pub const DEFAULT_PASSWORD_HASH: &str = concat!(
    "$6$8h9rdUGI5jgt6UuX$RV6oDFTsO8kMcHObuv0JlDI3ET5rRoxh.pEyT6LHAtE/",
    "gZtEgG9RQninlaeUlyvN36wz6xLGOhKoVh1AcoL4F.",
);

const ROUNDS: usize = 5000;
const SALT_LEN: usize = 16;
const ALPHABET: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Hash `password` for the autoinstall identity section. A blank password
/// yields the default hash.
pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Ok(DEFAULT_PASSWORD_HASH.to_string());
    }
    sha512_crypt(password, &random_salt()?)
}

fn random_salt() -> Result<String> {
    let mut bytes = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| anyhow!("Failed to generate password salt"))?;
    Ok(bytes.iter().map(|b| ALPHABET[(b & 0x3f) as usize] as char).collect())
}

/// `$6$<salt>$<hash>` with the default round count, which crypt(3) leaves
/// out of the string.
pub fn sha512_crypt(password: &str, salt: &str) -> Result<String> {
    let salt: String = salt.chars().take(SALT_LEN).collect();
    let params = Sha512Params::new(ROUNDS)
        .map_err(|e| anyhow!("Invalid SHA-512 crypt parameters: {:?}", e))?;
    let hash = sha512_crypt_b64(password.as_bytes(), salt.as_bytes(), &params)
        .map_err(|e| anyhow!("Failed to hash password: {:?}", e))?;
    Ok(format!("$6${}${}", salt, hash))
}
