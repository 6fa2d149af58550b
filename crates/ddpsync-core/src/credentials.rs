//! Credential persistence
//!
//! The session only persists one value, the resume token, but stores are plain
//! string key/value maps so applications can plug in keychains or other
//! secure storage.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::CredentialError;
use crate::locks::lock;

/// Key under which the resume token is stored
pub const RESUME_TOKEN_KEY: &str = "resume.token";

/// Key/value storage for credentials
pub trait CredentialStore: Send + Sync {
    /// Store a value, or remove the key when `value` is `None`
    fn save(&self, key: &str, value: Option<&str>) -> Result<(), CredentialError>;

    /// Load a value
    fn load(&self, key: &str) -> Result<Option<String>, CredentialError>;
}

/// Credentials kept in memory for the life of the process
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, key: &str, value: Option<&str>) -> Result<(), CredentialError> {
        let mut values = lock(&self.values);
        match value {
            Some(value) => {
                values.insert(key.to_string(), value.to_string());
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(lock(&self.values).get(key).cloned())
    }
}

/// Credentials stored as a JSON object in a file
///
/// The whole file is rewritten on every save.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the credential file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, CredentialError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let json = fs::read_to_string(&self.path).map_err(|source| CredentialError::Read {
            path: self.path.clone(),
            source,
        })?;
        if json.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&json).map_err(|source| CredentialError::Format {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, values: &HashMap<String, String>) -> Result<(), CredentialError> {
        let write_error = |source| CredentialError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }

        let json = serde_json::to_string_pretty(values).map_err(|source| CredentialError::Format {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(write_error)
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, key: &str, value: Option<&str>) -> Result<(), CredentialError> {
        let _guard = lock(&self.write_lock);
        let mut values = self.read_all()?;
        match value {
            Some(value) => {
                values.insert(key.to_string(), value.to_string());
            }
            None => {
                values.remove(key);
            }
        }
        self.write_all(&values)
    }

    fn load(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.read_all()?.remove(key))
    }
}
