use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::{ProjectDirs, UserDirs};

use crate::error::DepotError;

/// On-disk locations owned by the tool: settings and the scan cache.
#[derive(Debug, Clone)]
pub struct Store {
    config_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, DepotError> {
        let dirs = ProjectDirs::from("org", "switchroot", "depot").ok_or_else(|| {
            DepotError::Filesystem("unable to resolve config directory".to_string())
        })?;
        let config_root = Utf8PathBuf::from_path_buf(dirs.config_dir().to_path_buf())
            .map_err(|_| DepotError::Filesystem("invalid config path".to_string()))?;
        let cache_root = Utf8PathBuf::from_path_buf(dirs.cache_dir().to_path_buf())
            .map_err(|_| DepotError::Filesystem("invalid cache path".to_string()))?;

        Ok(Self {
            config_root,
            cache_root,
        })
    }

    pub fn new_with_paths(config_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            config_root,
            cache_root,
        }
    }

    pub fn config_root(&self) -> &Utf8Path {
        &self.config_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn settings_path(&self) -> Utf8PathBuf {
        self.config_root.join("settings.json")
    }

    pub fn scan_cache_path(&self) -> Utf8PathBuf {
        self.cache_root.join("last_scan.json")
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), DepotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| DepotError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| DepotError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| DepotError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// The user's Downloads folder, falling back to `~/Downloads`.
pub fn default_download_dir() -> Option<Utf8PathBuf> {
    let dirs = UserDirs::new()?;
    let path = dirs
        .download_dir()
        .map(|dir| dir.to_path_buf())
        .unwrap_or_else(|| dirs.home_dir().join("Downloads"));
    Utf8PathBuf::from_path_buf(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_paths(
            Utf8PathBuf::from("/tmp/depot/config"),
            Utf8PathBuf::from("/tmp/depot/cache"),
        );
        assert!(store.settings_path().ends_with("config/settings.json"));
        assert!(store.scan_cache_path().ends_with("cache/last_scan.json"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("nested").join("file.json");

        Store::write_bytes_atomic(&path, b"first").unwrap();
        Store::write_bytes_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"second");
        assert!(!path.with_extension("tmp").as_std_path().exists());
    }
}
