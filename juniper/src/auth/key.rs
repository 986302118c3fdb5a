use std::io::ErrorKind;
use std::path::Path;

use axum_extra::extract::cookie::Key;
use base64::prelude::*;
use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

/// Length of the master key kept on disk.
pub const SESSION_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SessionKeyError {
    #[error("invalid key length: {0}")]
    InvalidLength(usize),
    #[error("failed to read session key {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write session key {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Random key material. Only 16, 24 and 32 byte keys are accepted.
pub fn generate_random_key(length: usize) -> Result<Vec<u8>, SessionKeyError> {
    if !matches!(length, 16 | 24 | 32) {
        return Err(SessionKeyError::InvalidLength(length));
    }

    let mut key = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut key);
    Ok(key)
}

/// `length` random bytes as URL-safe base64.
pub fn generate_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE.encode(bytes)
}

pub fn save_session_key(path: &Path, key: &[u8]) -> Result<(), SessionKeyError> {
    let write_err = |source| SessionKeyError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    write_private(path, key).map_err(write_err)
}

#[cfg(unix)]
fn write_private(path: &Path, key: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(key)
}

#[cfg(not(unix))]
fn write_private(path: &Path, key: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, key)
}

pub fn load_session_key(path: &Path) -> Result<Vec<u8>, SessionKeyError> {
    check_key_file_permissions(path);
    let key = std::fs::read(path).map_err(|source| SessionKeyError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if key.len() != SESSION_KEY_LEN {
        return Err(SessionKeyError::InvalidLength(key.len()));
    }
    Ok(key)
}

/// Load the master key, or create and persist a new one when the file is absent.
pub fn init_session_key(path: &Path) -> Result<Vec<u8>, SessionKeyError> {
    match load_session_key(path) {
        Ok(key) => Ok(key),
        Err(SessionKeyError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
            let key = generate_random_key(SESSION_KEY_LEN)?;
            save_session_key(path, &key)?;
            info!(path = %path.display(), "generated new session key");
            Ok(key)
        }
        Err(err) => Err(err),
    }
}

/// Cookie signing key derived from the master key.
pub fn cookie_key(master: &[u8]) -> Result<Key, SessionKeyError> {
    if master.len() < SESSION_KEY_LEN {
        return Err(SessionKeyError::InvalidLength(master.len()));
    }
    Ok(Key::derive_from(master))
}

/// Warn if the key file is world-readable. No-op on non-Unix.
#[cfg(unix)]
fn check_key_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o004 != 0 {
            warn!(
                path = %path.display(),
                "session key file is world-readable; consider chmod 600"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_key_file_permissions(_path: &Path) {}
