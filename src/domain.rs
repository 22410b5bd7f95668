use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::DepotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    Os,
    Mobile,
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildKind::Os => write!(f, "Linux"),
            BuildKind::Mobile => write!(f, "Android"),
        }
    }
}

/// Role of a file inside a download run. Drives the destination layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactCategory {
    Os,
    Mobile,
    Companion,
    Build,
    Extras,
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactCategory::Os => write!(f, "os"),
            ArtifactCategory::Mobile => write!(f, "mobile"),
            ArtifactCategory::Companion => write!(f, "companion"),
            ArtifactCategory::Build => write!(f, "build"),
            ArtifactCategory::Extras => write!(f, "extras"),
        }
    }
}

/// Device profile, e.g. `TV` or `Tablet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTag(String);

impl ProfileTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the tag from a device display name: `Android (TV)` becomes `TV`
    /// and `Android (TV Box)` becomes `TV-Box`.
    pub fn from_display_name(name: &str) -> Result<Self, DepotError> {
        let inner = match name.split_once('(') {
            Some((_, rest)) => rest.replace(')', ""),
            None => name.to_string(),
        };
        inner.split_whitespace().collect::<Vec<_>>().join("-").parse()
    }

    /// Top-level directory holding everything that belongs to this profile.
    pub fn root_dir_name(&self) -> String {
        format!("Android-{}", self.0)
    }
}

impl fmt::Display for ProfileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProfileTag {
    type Err = DepotError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(DepotError::InvalidSelection(format!(
                "invalid profile tag: {value}"
            )));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
    pub filename: String,
    pub size_bytes: u64,
    pub category: ArtifactCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_relative_path: Option<Utf8PathBuf>,
}

impl Artifact {
    pub fn new(url: &str, filename: &str, size_bytes: u64, category: ArtifactCategory) -> Self {
        Self {
            url: url.to_string(),
            filename: filename.to_string(),
            size_bytes,
            category,
            explicit_relative_path: None,
        }
    }

    /// Zero size marks a link whose metadata could not be resolved.
    pub fn is_resolvable(&self) -> bool {
        self.size_bytes > 0
    }
}

/// Last path segment of a URL, ignoring any query string.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEntry {
    pub kind: BuildKind,
    pub distribution_label: String,
    pub display_name: String,
    pub aggregate_size_bytes: u64,
    pub primary_artifact: Artifact,
    #[serde(default)]
    pub companion_artifact: Option<Artifact>,
    #[serde(default)]
    pub profile_tag: Option<ProfileTag>,
    #[serde(default)]
    pub extra_artifacts: Vec<Artifact>,
}

impl BuildEntry {
    pub fn new(
        kind: BuildKind,
        distribution_label: String,
        display_name: String,
        primary_artifact: Artifact,
        companion_artifact: Option<Artifact>,
        profile_tag: Option<ProfileTag>,
        extra_artifacts: Vec<Artifact>,
    ) -> Self {
        let aggregate_size_bytes = primary_artifact.size_bytes
            + companion_artifact
                .as_ref()
                .map(|artifact| artifact.size_bytes)
                .unwrap_or(0);
        Self {
            kind,
            distribution_label,
            display_name,
            aggregate_size_bytes,
            primary_artifact,
            companion_artifact,
            profile_tag,
            extra_artifacts,
        }
    }

    pub fn size_label(&self) -> String {
        format_size(self.aggregate_size_bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTask {
    pub url: String,
    pub filename: String,
    pub sequence_number: usize,
    pub total_task_count: usize,
    pub category: ArtifactCategory,
    pub profile_tag: Option<ProfileTag>,
    pub destination_path: Option<Utf8PathBuf>,
}

pub fn format_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}
