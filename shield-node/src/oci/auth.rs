//! API-key credential staging and profile parsing.
//!
//! The deployment hands the daemon its OCI credentials as two base64
//! environment variables. They are written to the conventional
//! `<dir>/config` and `<dir>/oci_api_key.pem` locations, with the config's
//! `key_file` entry rewritten to the staged key path.

use crate::error::{Result, ShieldError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_ENV: &str = "OCI_CONFIG_FILE_CONTENT";
const KEY_ENV: &str = "OCI_PRIVATE_KEY_FILE_CONTENT";

/// One parsed API-key profile from an OCI config file.
#[derive(Debug, Clone)]
pub struct OciProfile {
    pub tenancy: String,
    pub user: String,
    pub fingerprint: String,
    pub key_file: PathBuf,
    pub region: String,
}

impl OciProfile {
    /// `keyId` component of the request signature.
    pub fn key_id(&self) -> String {
        format!("{}/{}/{}", self.tenancy, self.user, self.fingerprint)
    }
}

/// Decode the credential env vars and write them under `dir`.
///
/// Returns the path of the staged config file.
pub fn stage_credentials(dir: &Path) -> Result<PathBuf> {
    let config_b64 = std::env::var(CONFIG_ENV)
        .map_err(|_| ShieldError::Credential(format!("{CONFIG_ENV} is not set")))?;
    let key_b64 = std::env::var(KEY_ENV)
        .map_err(|_| ShieldError::Credential(format!("{KEY_ENV} is not set")))?;

    let config_bytes = BASE64
        .decode(config_b64.trim())
        .map_err(|e| ShieldError::Credential(format!("{CONFIG_ENV} is not valid base64: {e}")))?;
    let key_bytes = BASE64
        .decode(key_b64.trim())
        .map_err(|e| ShieldError::Credential(format!("{KEY_ENV} is not valid base64: {e}")))?;

    std::fs::create_dir_all(dir)?;
    let config_path = dir.join("config");
    let key_path = dir.join("oci_api_key.pem");

    // Point key_file at the staged key regardless of what the original
    // config referenced.
    let config_text = String::from_utf8_lossy(&config_bytes);
    let rewritten = rewrite_key_file(&config_text, &key_path);

    std::fs::write(&config_path, rewritten)?;
    std::fs::write(&key_path, key_bytes)?;
    restrict_permissions(&key_path)?;

    info!(config = %config_path.display(), "OCI credentials staged");
    Ok(config_path)
}

fn rewrite_key_file(config: &str, key_path: &Path) -> String {
    let key_line = format!("key_file = {}", key_path.display());
    let mut lines: Vec<String> = Vec::new();
    let mut found = false;

    for line in config.lines() {
        if line.trim_start().starts_with("key_file") {
            lines.push(key_line.clone());
            found = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !found {
        lines.push(key_line);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

/// Parse the profile fields the signer needs out of an OCI config file.
///
/// The file is INI-shaped; section headers are ignored, so the first
/// occurrence of each key wins (the staged file carries a single profile).
pub fn load_profile(config_path: &Path) -> Result<OciProfile> {
    let text = std::fs::read_to_string(config_path)?;

    let mut tenancy = None;
    let mut user = None;
    let mut fingerprint = None;
    let mut key_file = None;
    let mut region = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().to_string();
        match key {
            "tenancy" => tenancy.get_or_insert(value),
            "user" => user.get_or_insert(value),
            "fingerprint" => fingerprint.get_or_insert(value),
            "key_file" => key_file.get_or_insert(value),
            "region" => region.get_or_insert(value),
            _ => continue,
        };
    }

    let require = |field: Option<String>, name: &str| {
        field.ok_or_else(|| {
            ShieldError::Credential(format!("OCI config is missing required field '{name}'"))
        })
    };

    Ok(OciProfile {
        tenancy: require(tenancy, "tenancy")?,
        user: require(user, "user")?,
        fingerprint: require(fingerprint, "fingerprint")?,
        key_file: PathBuf::from(require(key_file, "key_file")?),
        region: require(region, "region")?,
    })
}
