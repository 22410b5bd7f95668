use std::collections::HashMap;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Components, StaticSource};
use crate::domain::{Artifact, ArtifactCategory, BuildEntry, BuildKind, ProfileTag, filename_from_url};
use crate::error::DepotError;
use crate::sources::{RawBuild, RawBuildFile, SourceClient};
use crate::variant::{VariantMatcher, companion_suffix};

const PRIMARY_PREFIX: &str = "lineage-";
const ARCHIVE_EXTENSION: &str = ".zip";

/// Runs discovery against every configured source and reconciles the results
/// into `BuildEntry` records, in discovery order.
pub struct Catalog<'a, C: SourceClient> {
    components: &'a Components,
    client: &'a C,
}

impl<'a, C: SourceClient> Catalog<'a, C> {
    pub fn new(components: &'a Components, client: &'a C) -> Self {
        Self { components, client }
    }

    pub fn scan(&self) -> Result<Vec<BuildEntry>, DepotError> {
        let pattern = self.components.file_patterns.compile()?;

        info!("fetching companion repository list");
        let repos = match self.client.list_companion_repos() {
            Ok(repos) => {
                info!(count = repos.len(), "companion repositories found");
                repos
            }
            Err(err) => {
                warn!(error = %err, "companion repository list unavailable, builds will have no companion");
                Vec::new()
            }
        };
        let mut companions = CompanionResolver::new(VariantMatcher::new(repos), self.client);

        let mut entries = Vec::new();
        for source in &self.components.linux_distros {
            match self.scan_static_source(source, &pattern) {
                Ok(found) => entries.extend(found),
                Err(err) => warn!(source = %source.name, error = %err, "failed to scan source"),
            }
        }

        for (profile_id, display_name) in &self.components.android_devices {
            match self.scan_profile(profile_id, display_name, &mut companions) {
                Ok(found) => entries.extend(found),
                Err(err) => warn!(profile = %display_name, error = %err, "failed to scan profile"),
            }
        }

        info!(count = entries.len(), "scan complete");
        Ok(entries)
    }

    fn scan_static_source(
        &self,
        source: &StaticSource,
        pattern: &regex::Regex,
    ) -> Result<Vec<BuildEntry>, DepotError> {
        info!(source = %source.name, url = %source.url, "checking static source");
        let hrefs = self.client.list_static_files(source, pattern)?;
        if hrefs.is_empty() {
            info!(source = %source.name, "no archives found");
            return Ok(Vec::new());
        }

        let entries = hrefs
            .iter()
            .map(|href| {
                let url = resolve_candidate_url(&source.url, href);
                let size = match self.client.probe_size(&url) {
                    Ok(size) => size,
                    Err(err) => {
                        warn!(url = %url, error = %err, "could not resolve size");
                        0
                    }
                };
                static_entry(source, href, &url, size)
            })
            .collect();
        Ok(entries)
    }

    fn scan_profile(
        &self,
        profile_id: &str,
        display_name: &str,
        companions: &mut CompanionResolver<'_, C>,
    ) -> Result<Vec<BuildEntry>, DepotError> {
        info!(profile = %display_name, "checking build API");
        let builds = self.client.fetch_builds(profile_id)?;
        if builds.is_empty() {
            info!(profile = %display_name, "no builds found");
            return Ok(Vec::new());
        }
        let tag = ProfileTag::from_display_name(display_name)?;

        let mut entries = Vec::new();
        for build in &builds {
            let android_version = self.components.android_version(&build.version);
            let suffix = companion_suffix(profile_id);
            let Some(primary) = primary_archive(build) else {
                debug!(version = %build.version, date = %build.date, "build has no primary archive");
                continue;
            };
            let companion = companions.resolve(&android_version, suffix);
            entries.push(mobile_entry(build, &tag, primary, companion));
        }
        Ok(entries)
    }
}

/// Resolves and memoizes companion artifacts per `(version, suffix)` for one scan.
pub struct CompanionResolver<'a, C: SourceClient> {
    matcher: VariantMatcher,
    client: &'a C,
    resolved: HashMap<(String, String), Option<Artifact>>,
}

impl<'a, C: SourceClient> CompanionResolver<'a, C> {
    pub fn new(matcher: VariantMatcher, client: &'a C) -> Self {
        Self {
            matcher,
            client,
            resolved: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, version: &str, suffix: &str) -> Option<Artifact> {
        let key = (version.to_string(), suffix.to_string());
        if let Some(cached) = self.resolved.get(&key) {
            return cached.clone();
        }
        let artifact = self.lookup(version, suffix);
        self.resolved.insert(key, artifact.clone());
        artifact
    }

    fn lookup(&self, version: &str, suffix: &str) -> Option<Artifact> {
        let repo = self.matcher.find(version, suffix)?.name;
        let assets = match self.client.latest_release_assets(repo) {
            Ok(assets) => assets,
            Err(err) => {
                warn!(repo, error = %err, "could not fetch companion release");
                return None;
            }
        };
        let asset = assets
            .into_iter()
            .find(|asset| asset.name.ends_with(ARCHIVE_EXTENSION))?;
        info!(repo, asset = %asset.name, "companion found");
        Some(Artifact::new(
            &asset.browser_download_url,
            &asset.name,
            asset.size,
            ArtifactCategory::Companion,
        ))
    }
}

/// Absolute hrefs are kept, rooted ones resolve against the source's origin and
/// relative ones against the source directory.
pub fn resolve_candidate_url(source_url: &str, href: &str) -> String {
    if Url::parse(href).is_ok() {
        return href.to_string();
    }
    let base = if href.starts_with('/') || source_url.ends_with('/') {
        source_url.to_string()
    } else {
        format!("{source_url}/")
    };
    match Url::parse(&base).and_then(|base| base.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{source_url}{href}"),
    }
}

pub fn static_entry(source: &StaticSource, href: &str, url: &str, size: u64) -> BuildEntry {
    let filename = filename_from_url(href);
    BuildEntry::new(
        BuildKind::Os,
        source.name.clone(),
        filename.clone(),
        Artifact::new(url, &filename, size, ArtifactCategory::Os),
        None,
        None,
        Vec::new(),
    )
}

fn primary_archive(build: &RawBuild) -> Option<&RawBuildFile> {
    build
        .files
        .iter()
        .rev()
        .find(|file| {
            file.filename.starts_with(PRIMARY_PREFIX) && file.filename.ends_with(ARCHIVE_EXTENSION)
        })
}

fn mobile_entry(
    build: &RawBuild,
    tag: &ProfileTag,
    primary: &RawBuildFile,
    companion: Option<Artifact>,
) -> BuildEntry {
    let date = build.date.replace('-', "");
    let display_name = match companion {
        Some(_) => format!("LineageOS {} ({date}) + MindTheGapps", build.version),
        None => format!("LineageOS {} ({date}) (GApps not available)", build.version),
    };
    let extras = build
        .files
        .iter()
        .filter(|file| file.filename != primary.filename)
        .map(|file| Artifact::new(&file.url, &file.filename, file.size, ArtifactCategory::Build))
        .collect();

    BuildEntry::new(
        BuildKind::Mobile,
        format!("Android {tag}"),
        display_name,
        Artifact::new(
            &primary.url,
            &primary.filename,
            primary.size,
            ArtifactCategory::Mobile,
        ),
        companion,
        Some(tag.clone()),
        extras,
    )
}
