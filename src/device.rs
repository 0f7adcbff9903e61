//! Per-device identity.
//!
//! Every vector clock entry is keyed by a device id, so it must survive
//! restarts. The id is generated once and persisted as a plain text file in
//! the data directory next to the database.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const DEVICE_ID_FILE: &str = "device_id";

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to access device id file '{}': {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Device id file '{}' is empty", .0.display())]
    Empty(PathBuf),
}

pub fn device_id_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DEVICE_ID_FILE)
}

/// Loads the persisted device id. Returns `Ok(None)` if none has been created.
pub fn load(data_dir: &Path) -> Result<Option<String>, DeviceError> {
    let path = device_id_path(data_dir);

    match fs::read_to_string(&path) {
        Ok(content) => {
            let id = content.trim();
            if id.is_empty() {
                return Err(DeviceError::Empty(path));
            }
            Ok(Some(id.to_string()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DeviceError::Io { path, source }),
    }
}

/// Loads the device id, generating and saving a new one on first use.
pub fn load_or_create(data_dir: &Path) -> Result<String, DeviceError> {
    if let Some(id) = load(data_dir)? {
        return Ok(id);
    }

    fs::create_dir_all(data_dir).map_err(|source| DeviceError::Io {
        path: data_dir.to_path_buf(),
        source,
    })?;

    let id = Uuid::new_v4().to_string();
    let path = device_id_path(data_dir);
    fs::write(&path, &id).map_err(|source| DeviceError::Io { path, source })?;

    tracing::info!("Generated device id {}", id);
    Ok(id)
}
