//! Credential loading from the runtime `.env` file.
//!
//! Values come from `<data_dir>/.env` when present (which must be private
//! to the owner), falling back to the process environment key by key.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use base64::Engine;
use tracing::{debug, info};

use crate::vault::VaultCredentials;

/// Env key of the vault API client id.
pub const VAULT_CLIENT_ID: &str = "VAULT_CLIENT_ID";
/// Env key of the vault API client secret.
pub const VAULT_CLIENT_SECRET: &str = "VAULT_CLIENT_SECRET";
/// Env key of the vault master password.
pub const VAULT_PASSWORD: &str = "VAULT_PASSWORD";
/// Env key of an optional base64 pre-authenticated CLI state blob.
pub const VAULT_SESSION_BLOB: &str = "VAULT_SESSION_BLOB";

/// File name the decoded session blob is written to.
pub const SESSION_BLOB_FILE: &str = "data.json";

/// Opaque secret value that never appears in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Create a new secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value. Use only when handing it to a child process.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("__REDACTED__")
    }
}

/// Runtime credentials.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Returns a credential value for a key, if present and non-empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Returns a required credential or an error when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is missing or empty.
    pub fn require(&self, key: &str) -> anyhow::Result<SecretValue> {
        self.get(key)
            .map(SecretValue::new)
            .ok_or_else(|| anyhow::anyhow!("missing required credential: {key}"))
    }

    /// Vault login and unlock credentials.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing key.
    pub fn vault(&self) -> anyhow::Result<VaultCredentials> {
        Ok(VaultCredentials {
            client_id: self.require(VAULT_CLIENT_ID)?,
            client_secret: self.require(VAULT_CLIENT_SECRET)?,
            password: self.require(VAULT_PASSWORD)?,
        })
    }

    /// Fill keys missing from the file with values from `env`.
    pub fn merge_env(&mut self, keys: &[&str], env: impl Fn(&str) -> Option<String>) {
        for key in keys {
            if self.get(key).is_none() {
                if let Some(value) = env(key) {
                    self.vars.insert((*key).to_owned(), value);
                }
            }
        }
    }
}

/// Load credentials from a specific `.env` path.
///
/// # Errors
///
/// Returns an error if the file does not exist, permissions are too broad,
/// or parsing fails.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "credentials file does not exist: {}",
            path.display()
        ));
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in credentials file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(Credentials { vars })
}

/// Load `<data_dir>/.env` if present, then fill vault keys from the
/// process environment.
///
/// # Errors
///
/// Returns an error if the file exists but is unreadable or not private.
pub fn load_runtime_credentials(data_dir: &Path) -> anyhow::Result<Credentials> {
    let env_file = data_dir.join(".env");
    let mut credentials = if env_file.exists() {
        info!(path = %env_file.display(), "loading credentials file");
        load_credentials(&env_file)?
    } else {
        debug!(path = %env_file.display(), "no credentials file, using process environment");
        Credentials::default()
    };
    credentials.merge_env(
        &[
            VAULT_CLIENT_ID,
            VAULT_CLIENT_SECRET,
            VAULT_PASSWORD,
            VAULT_SESSION_BLOB,
        ],
        |key| std::env::var(key).ok(),
    );
    Ok(credentials)
}

/// Decode a base64 CLI state blob into `state_dir/data.json`.
///
/// # Errors
///
/// Returns an error if the blob is not valid base64 or cannot be written.
pub fn write_session_blob(blob: &str, state_dir: &Path) -> anyhow::Result<()> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(blob.trim())
        .context("session blob is not valid base64")?;
    let path = state_dir.join(SESSION_BLOB_FILE);
    fs::write(&path, bytes)
        .with_context(|| format!("failed to write session blob to {}", path.display()))?;
    enforce_private_file_permissions(&path)?;
    info!(path = %path.display(), "restored vault CLI state from session blob");
    Ok(())
}

/// Restrict a file to its owner when supported.
///
/// # Errors
///
/// Returns an error if permissions cannot be updated.
pub fn enforce_private_file_permissions(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
