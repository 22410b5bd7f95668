use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RequiredFile;
use crate::domain::{Artifact, ArtifactCategory, BuildEntry, DownloadTask, ProfileTag};

/// Build files flashed by the installer; everything else is loaded at runtime.
const INSTALL_FILES: [&str; 3] = ["boot.img", "recovery.img", "nx-plat.dtimg"];
/// Build files never fetched: copies of the primary archive and the unused dynamic-partition image.
const PRIMARY_PREFIX: &str = "lineage-";
const SKIPPED_IMAGE: &str = "super_empty.img";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedArtifact {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadPlan {
    pub tasks: Vec<DownloadTask>,
    pub skipped: Vec<SkippedArtifact>,
}

impl DownloadPlan {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Profiles referenced by at least one task, in first-appearance order.
    pub fn profiles(&self) -> Vec<ProfileTag> {
        let mut profiles: Vec<ProfileTag> = Vec::new();
        for tag in self.tasks.iter().filter_map(|task| task.profile_tag.as_ref()) {
            if !profiles.contains(tag) {
                profiles.push(tag.clone());
            }
        }
        profiles
    }
}

/// Task fields known before the whole selection has been expanded.
struct PendingTask {
    url: String,
    filename: String,
    category: ArtifactCategory,
    profile_tag: Option<ProfileTag>,
    destination_path: Option<Utf8PathBuf>,
}

impl PendingTask {
    fn from_artifact(artifact: &Artifact, profile_tag: Option<&ProfileTag>) -> Self {
        Self {
            url: artifact.url.clone(),
            filename: artifact.filename.clone(),
            category: artifact.category,
            profile_tag: profile_tag.cloned(),
            destination_path: artifact.explicit_relative_path.clone(),
        }
    }

    fn from_required(file: &RequiredFile, profile_tag: &ProfileTag) -> Self {
        Self {
            url: file.url.clone(),
            filename: file.name.clone(),
            category: ArtifactCategory::Extras,
            profile_tag: Some(profile_tag.clone()),
            destination_path: Some(file.path.clone()),
        }
    }
}

pub struct TaskPlanner<'a> {
    required_files: &'a [RequiredFile],
}

impl<'a> TaskPlanner<'a> {
    pub fn new(required_files: &'a [RequiredFile]) -> Self {
        Self { required_files }
    }

    /// Expands the selection into a flat task list. Primary and companion tasks
    /// come first in selection order, then each profile's build files and
    /// required files, once per profile.
    pub fn plan(&self, selected: &[BuildEntry]) -> DownloadPlan {
        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        let mut profiles: Vec<ProfileTag> = Vec::new();
        let mut build_files: Vec<(ProfileTag, &[Artifact])> = Vec::new();

        for entry in selected {
            let primary = &entry.primary_artifact;
            if !primary.is_resolvable() {
                warn!(file = %primary.filename, "skipping build, file size is reported as 0 B");
                skipped.push(zero_size(primary));
                continue;
            }
            let tag = entry.profile_tag.as_ref();
            pending.push(PendingTask::from_artifact(primary, tag));
            debug!(file = %primary.filename, "planned primary download");

            match &entry.companion_artifact {
                Some(companion) if companion.is_resolvable() => {
                    pending.push(PendingTask::from_artifact(companion, tag));
                    debug!(file = %companion.filename, "planned companion download");
                }
                Some(companion) => {
                    warn!(file = %companion.filename, "skipping companion, file size is reported as 0 B");
                    skipped.push(zero_size(companion));
                }
                None => {}
            }

            if let Some(tag) = tag {
                if !profiles.contains(tag) {
                    profiles.push(tag.clone());
                }
                // The latest selected build of a profile supplies its build files.
                build_files.retain(|(existing, _)| existing != tag);
                build_files.push((tag.clone(), &entry.extra_artifacts));
            }
        }

        for tag in &profiles {
            let files = build_files
                .iter()
                .find(|(existing, _)| existing == tag)
                .map(|(_, files)| *files)
                .unwrap_or_default();
            for artifact in files {
                if artifact.filename.starts_with(PRIMARY_PREFIX)
                    || artifact.filename.contains(SKIPPED_IMAGE)
                {
                    continue;
                }
                if !artifact.is_resolvable() {
                    warn!(file = %artifact.filename, profile = %tag, "skipping build file, file size is reported as 0 B");
                    skipped.push(zero_size(artifact));
                    continue;
                }
                let mut task = PendingTask::from_artifact(artifact, Some(tag));
                task.category = ArtifactCategory::Build;
                pending.push(task);
            }
            for file in self.required_files {
                pending.push(PendingTask::from_required(file, tag));
            }
            debug!(profile = %tag, "planned profile files");
        }

        let total_task_count = pending.len();
        let tasks = pending
            .into_iter()
            .enumerate()
            .map(|(index, task)| DownloadTask {
                url: task.url,
                filename: task.filename,
                sequence_number: index + 1,
                total_task_count,
                category: task.category,
                profile_tag: task.profile_tag,
                destination_path: task.destination_path,
            })
            .collect();
        info!(tasks = total_task_count, skipped = skipped.len(), "download plan ready");

        DownloadPlan { tasks, skipped }
    }
}

fn zero_size(artifact: &Artifact) -> SkippedArtifact {
    SkippedArtifact {
        filename: artifact.filename.clone(),
        reason: "file size is reported as 0 B (invalid URL)".to_string(),
    }
}

/// Where a task's file lands under the download root.
pub fn destination_for(root: &Utf8Path, task: &DownloadTask) -> Utf8PathBuf {
    let explicit = task
        .destination_path
        .as_deref()
        .filter(|path| is_contained(path));
    let Some(profile) = &task.profile_tag else {
        return match explicit {
            Some(path) => root.join(path),
            None => root.join(&task.filename),
        };
    };

    let base = root.join(profile.root_dir_name());
    if let Some(path) = explicit {
        return base.join(path);
    }
    match task.category {
        ArtifactCategory::Build if INSTALL_FILES.contains(&task.filename.as_str()) => base
            .join("switchroot")
            .join("install")
            .join(&task.filename),
        ArtifactCategory::Build | ArtifactCategory::Extras => base
            .join("switchroot")
            .join("android")
            .join(&task.filename),
        ArtifactCategory::Os | ArtifactCategory::Mobile | ArtifactCategory::Companion => {
            base.join(&task.filename)
        }
    }
}

/// Bootloader descriptor written once a profile's downloads have all finished.
pub fn descriptor_path(root: &Utf8Path, profile: &ProfileTag) -> Utf8PathBuf {
    root.join(profile.root_dir_name())
        .join("bootloader")
        .join("ini")
        .join("android.ini")
}

fn is_contained(path: &Utf8Path) -> bool {
    path.components()
        .all(|component| matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir))
}
