//! Provider store.
//!
//! Providers persist as one JSON document. Key material never appears here:
//! records hold an `ApiKeyRef` and a fingerprint only.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::provider::Provider;
use crate::error::Result;

const STORE_VERSION: u32 = 1;

/// Root providers file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersFile {
    pub version: u32,
    #[serde(default)]
    pub providers: Vec<Provider>,
}

impl Default for ProvidersFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            providers: Vec::new(),
        }
    }
}

/// JSON file holding provider records.
#[derive(Debug, Clone)]
pub struct ProviderStore {
    path: PathBuf,
}

impl ProviderStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all providers. A missing file is an empty store.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or contains invalid JSON.
    pub fn load(&self) -> Result<Vec<Provider>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: ProvidersFile = serde_json::from_str(&content)?;
        Ok(file.providers)
    }

    /// Replace the stored set.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the write fails.
    pub fn save(&self, providers: &[Provider]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ProvidersFile {
            version: STORE_VERSION,
            providers: providers.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.path, content.as_bytes())?;
        Ok(())
    }
}

/// Temp file + rename in the same directory.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("providers"),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_test_provider;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProviderStore::new(dir.path().join("providers.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = ProviderStore::new(dir.path().join("nested/providers.json"));
        let mut provider = make_test_provider("openai-main", 10);
        provider.usage.request_count = 4;

        store.save(std::slice::from_ref(&provider)).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![provider]);
    }

    #[test]
    fn file_never_contains_key_material() {
        let dir = TempDir::new().unwrap();
        let store = ProviderStore::new(dir.path().join("providers.json"));
        store.save(&[make_test_provider("p", 1)]).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"source\": \"env\""));
        assert!(!raw.contains("sk-"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("providers.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ProviderStore::new(path).load().is_err());
    }
}
