use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::DepotError;
use crate::store::Store;

const BUILTIN_COMPONENTS: &str = include_str!("../components.json");

const REQUIRED_KEYS: [&str; 7] = [
    "linux_distros",
    "android_devices",
    "android_required_files",
    "android_ini_template",
    "api_urls",
    "version_map",
    "file_patterns",
];

pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_CONNECTIONS: usize = 8;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Components {
    pub linux_distros: Vec<StaticSource>,
    pub android_devices: BTreeMap<String, String>,
    pub android_required_files: Vec<RequiredFile>,
    pub android_ini_template: String,
    pub api_urls: ApiUrls,
    pub version_map: BTreeMap<String, String>,
    pub file_patterns: FilePatterns,
}

/// A plain file-index server listing archives for one distribution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StaticSource {
    pub name: String,
    pub url: String,
}

/// Static file every Android profile needs, placed at `path` under the profile root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequiredFile {
    pub name: String,
    pub url: String,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiUrls {
    pub android_api: String,
    pub gapps_org: String,
    #[serde(default = "default_gapps_release")]
    pub gapps_release: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilePatterns {
    pub download_file_pattern: String,
}

fn default_gapps_release() -> String {
    "https://api.github.com/repos/MindTheGapps/{}/releases/latest".to_string()
}

impl ApiUrls {
    pub fn builds_url(&self, profile_id: &str) -> String {
        self.android_api.replace("{}", profile_id)
    }

    pub fn release_url(&self, repo: &str) -> String {
        self.gapps_release.replace("{}", repo)
    }
}

impl FilePatterns {
    pub fn compile(&self) -> Result<Regex, DepotError> {
        Regex::new(&self.download_file_pattern)
            .map_err(|err| DepotError::InvalidPattern(err.to_string()))
    }
}

impl Components {
    /// Android major version for a LineageOS version, e.g. `21.0` maps to `14`.
    pub fn android_version(&self, los_version: &str) -> String {
        self.version_map
            .get(los_version)
            .cloned()
            .unwrap_or_else(|| {
                los_version
                    .split('.')
                    .next()
                    .unwrap_or(los_version)
                    .to_string()
            })
    }
}

pub struct ComponentsLoader;

impl ComponentsLoader {
    pub fn resolve(path: Option<&str>) -> Result<Components, DepotError> {
        match path {
            Some(path) => {
                let path = PathBuf::from(path);
                let content =
                    fs::read_to_string(&path).map_err(|_| DepotError::ComponentsRead(path))?;
                Self::parse(&content)
            }
            None => Self::parse(BUILTIN_COMPONENTS),
        }
    }

    pub fn parse(content: &str) -> Result<Components, DepotError> {
        let raw: Value = serde_json::from_str(content)
            .map_err(|err| DepotError::ComponentsParse(err.to_string()))?;
        let missing = REQUIRED_KEYS
            .iter()
            .filter(|key| raw.get(**key).is_none())
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(DepotError::ComponentsMissingKeys(missing.join(", ")));
        }
        let components: Components = serde_json::from_value(raw)
            .map_err(|err| DepotError::ComponentsParse(err.to_string()))?;
        components.file_patterns.compile()?;
        Ok(components)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub download_chunk_size: usize,
    #[serde(default = "default_connections")]
    pub download_connections: usize,
    #[serde(default = "default_workers")]
    pub download_workers: usize,
    #[serde(default)]
    pub download_dir: Option<Utf8PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github_token: None,
            download_chunk_size: DEFAULT_CHUNK_SIZE,
            download_connections: DEFAULT_CONNECTIONS,
            download_workers: DEFAULT_WORKERS,
            download_dir: None,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_connections() -> usize {
    DEFAULT_CONNECTIONS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl Settings {
    /// Token with surrounding whitespace removed; blank tokens count as absent.
    pub fn token(&self) -> Option<&str> {
        self.github_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Reads settings, falling back to defaults when the file is missing or unreadable.
    pub fn load(store: &Store) -> Self {
        let path = store.settings_path();
        if !path.as_std_path().exists() {
            return Self::default();
        }
        match fs::read_to_string(path.as_std_path())
            .map_err(|err| DepotError::Filesystem(err.to_string()))
            .and_then(|content| Self::parse(&content))
        {
            Ok(settings) => settings,
            Err(err) => {
                warn!(path = %path, error = %err, "ignoring unreadable settings");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, DepotError> {
        serde_json::from_str(content).map_err(|err| DepotError::SettingsParse(err.to_string()))
    }

    pub fn save(&self, store: &Store) -> Result<(), DepotError> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|err| DepotError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&store.settings_path(), &content)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn builtin_components_parse() {
        let components = ComponentsLoader::resolve(None).unwrap();
        assert!(!components.linux_distros.is_empty());
        assert!(components.android_devices.contains_key("nx_tab"));
        assert_eq!(
            components.api_urls.builds_url("nx"),
            "https://download.lineageos.org/api/v2/devices/nx/builds"
        );
    }

    #[test]
    fn missing_keys_are_reported() {
        let err = ComponentsLoader::parse(r#"{"linux_distros": []}"#).unwrap_err();
        assert_matches!(err, DepotError::ComponentsMissingKeys(keys) if keys.contains("version_map"));
    }

    #[test]
    fn android_version_falls_back_to_major() {
        let components = ComponentsLoader::resolve(None).unwrap();
        assert_eq!(components.android_version("21.0"), "14");
        assert_eq!(components.android_version("99.1"), "99");
    }

    #[test]
    fn settings_defaults_fill_missing_fields() {
        let settings = Settings::parse(r#"{"github_token": "  "}"#).unwrap();
        assert_eq!(settings.download_chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.download_connections, DEFAULT_CONNECTIONS);
        assert_eq!(settings.token(), None);
    }
}
