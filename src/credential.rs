//! Durable storage for the single API credential.

use crate::error::{DimShiftError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Where the credential lives between runs.
pub trait CredentialStore {
    /// Returns the stored credential, if any.
    fn get(&self) -> Result<Option<String>>;

    /// Replaces the stored credential.
    fn set(&self, credential: &str) -> Result<()>;

    /// Removes the stored credential. Clearing an empty store succeeds.
    fn clear(&self) -> Result<()>;

    /// Returns true if a credential is stored.
    fn is_set(&self) -> Result<bool> {
        Ok(self.get()?.is_some())
    }
}

/// Trims user input and rejects blank credentials.
pub fn normalize(credential: &str) -> Result<String> {
    let trimmed = credential.trim();
    if trimmed.is_empty() {
        return Err(DimShiftError::InvalidRequest("API key must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

/// Credential kept in a small TOML file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<config dir>/dimshift/credentials.toml`.
    pub fn default_location() -> Self {
        Self::new(default_credential_path())
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Default credential file path.
pub fn default_credential_path() -> PathBuf {
    crate::config::config_dir().join("credentials.toml")
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: CredentialFile = toml::from_str(&contents)?;
        Ok(file
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty()))
    }

    fn set(&self, credential: &str) -> Result<()> {
        let credential = normalize(credential)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string(&CredentialFile {
            api_key: Some(credential),
        })?;
        std::fs::write(&self.path, contents)?;
        restrict_permissions(&self.path)?;
        tracing::debug!(path = %self.path.display(), "stored API key");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "removed API key");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// In-process store, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds `credential`.
    pub fn with_credential(credential: impl Into<String>) -> Self {
        Self {
            credential: Mutex::new(Some(credential.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // A poisoned lock still holds a valid Option.
        self.credential.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<String>> {
        Ok(self.slot().clone())
    }

    fn set(&self, credential: &str) -> Result<()> {
        *self.slot() = Some(normalize(credential)?);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.toml");

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.get().unwrap(), None);
        assert!(!store.is_set().unwrap());

        store.set("  AIza-test-key \n").unwrap();

        // A fresh instance models a restart.
        let reloaded = FileCredentialStore::new(&path);
        assert_eq!(reloaded.get().unwrap().as_deref(), Some("AIza-test-key"));
        assert!(reloaded.is_set().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.toml"));
        store.set("secret").unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.toml"));

        store.clear().unwrap();
        store.set("key").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_rejects_blank() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.toml"));

        assert!(matches!(
            store.set("   "),
            Err(DimShiftError::InvalidRequest(_))
        ));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");
        std::fs::write(&path, "api_key = [").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(matches!(store.get(), Err(DimShiftError::Toml(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert!(!store.is_set().unwrap());
        store.set(" k ").unwrap();
        assert_eq!(store.get().unwrap().as_deref(), Some("k"));
        store.clear().unwrap();
        assert!(!store.is_set().unwrap());
    }
}
