use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::{Components, Settings};
use crate::domain::{BuildEntry, BuildKind, ProfileTag, format_size};
use crate::error::DepotError;
use crate::planner::{DownloadPlan, TaskPlanner};
use crate::pool::{DownloadPool, RunSummary};
use crate::progress::{CancelToken, ProgressSink};
use crate::scan_cache::ScanCache;
use crate::sources::SourceClient;
use crate::store::Store;
use crate::transfer::{RangeTransport, SegmentedDownloader, TransferSettings};

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub refresh: bool,
}

/// Entries picked for download: 1-based catalog indices, or everything.
#[derive(Debug, Clone)]
pub enum Selection {
    All,
    Indices(Vec<usize>),
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResult {
    pub scanned_at: DateTime<Utc>,
    pub from_cache: bool,
    pub entries: Vec<CatalogRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogRow {
    pub index: usize,
    pub kind: BuildKind,
    pub distribution: String,
    pub name: String,
    pub size: String,
    pub size_bytes: u64,
    pub profile: Option<ProfileTag>,
    pub companion: Option<String>,
}

impl CatalogRow {
    fn from_entry(index: usize, entry: &BuildEntry) -> Self {
        Self {
            index,
            kind: entry.kind,
            distribution: entry.distribution_label.clone(),
            name: entry.display_name.clone(),
            size: format_size(entry.aggregate_size_bytes),
            size_bytes: entry.aggregate_size_bytes,
            profile: entry.profile_tag.clone(),
            companion: entry
                .companion_artifact
                .as_ref()
                .map(|artifact| artifact.filename.clone()),
        }
    }
}

pub struct App<C: SourceClient, T: RangeTransport> {
    store: Store,
    components: Components,
    client: C,
    pool: DownloadPool<T>,
}

impl<C: SourceClient, T: RangeTransport> App<C, T> {
    pub fn new(
        store: Store,
        components: Components,
        settings: &Settings,
        client: C,
        transport: T,
    ) -> Self {
        let engine = SegmentedDownloader::new(transport, TransferSettings::from_settings(settings));
        let pool = DownloadPool::new(
            engine,
            settings.download_workers,
            &components.android_ini_template,
        );
        Self {
            store,
            components,
            client,
            pool,
        }
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    fn cache(&self) -> ScanCache {
        ScanCache::new(self.store.scan_cache_path())
    }

    /// Serves a fresh cached scan unless `refresh` is set, otherwise rescans
    /// every source and persists the result.
    pub fn scan(&self, options: ScanOptions) -> Result<CatalogResult, DepotError> {
        let (entries, scanned_at, from_cache) = self.load_entries(options)?;
        Ok(catalog_result(&entries, scanned_at, from_cache))
    }

    /// The cached catalog only; never touches the network.
    pub fn list(&self) -> Result<CatalogResult, DepotError> {
        let (entries, scanned_at) = self.cached_entries()?;
        Ok(catalog_result(&entries, scanned_at, true))
    }

    pub fn plan(&self, selected: &[BuildEntry]) -> DownloadPlan {
        TaskPlanner::new(&self.components.android_required_files).plan(selected)
    }

    pub fn download(
        &self,
        selection: &Selection,
        root: &Utf8Path,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunSummary, DepotError> {
        // Indices refer to the catalog `list` printed.
        let (entries, _) = self.cached_entries()?;
        let selected = select(&entries, selection)?;
        info!(selected = selected.len(), "selection resolved");
        let plan = self.plan(&selected);
        self.pool.run(&plan, root, sink, cancel)
    }

    fn cached_entries(&self) -> Result<(Vec<BuildEntry>, DateTime<Utc>), DepotError> {
        let record = self.cache().load().ok_or(DepotError::MissingCatalog)?;
        let scanned_at = record.scanned_at().ok_or(DepotError::MissingCatalog)?;
        Ok((record.entries, scanned_at))
    }

    fn load_entries(
        &self,
        options: ScanOptions,
    ) -> Result<(Vec<BuildEntry>, DateTime<Utc>, bool), DepotError> {
        let cache = self.cache();
        if !options.refresh {
            if let Some(record) = cache.load() {
                if let Some(scanned_at) = record.scanned_at() {
                    info!(entries = record.entries.len(), "using cached scan");
                    return Ok((record.entries, scanned_at, true));
                }
            }
        }

        let entries = Catalog::new(&self.components, &self.client).scan()?;
        let scanned_at = Utc::now();
        if let Err(err) = cache.save(&entries, scanned_at) {
            warn!(error = %err, path = %cache.path(), "could not persist scan");
        }
        Ok((entries, scanned_at, false))
    }
}

fn catalog_result(entries: &[BuildEntry], scanned_at: DateTime<Utc>, from_cache: bool) -> CatalogResult {
    CatalogResult {
        scanned_at,
        from_cache,
        entries: entries
            .iter()
            .enumerate()
            .map(|(index, entry)| CatalogRow::from_entry(index + 1, entry))
            .collect(),
    }
}

/// Resolves a selection against the catalog, keeping catalog order and
/// dropping repeated indices.
pub fn select(entries: &[BuildEntry], selection: &Selection) -> Result<Vec<BuildEntry>, DepotError> {
    let indices = match selection {
        Selection::All => (1..=entries.len()).collect::<Vec<_>>(),
        Selection::Indices(indices) => {
            let mut indices = indices.clone();
            indices.sort_unstable();
            indices.dedup();
            indices
        }
    };
    if indices.is_empty() {
        return Err(DepotError::InvalidSelection(
            "nothing selected".to_string(),
        ));
    }
    indices
        .into_iter()
        .map(|index| {
            index
                .checked_sub(1)
                .and_then(|position| entries.get(position))
                .cloned()
                .ok_or_else(|| {
                    DepotError::InvalidSelection(format!(
                        "index {index} is outside 1..={}",
                        entries.len()
                    ))
                })
        })
        .collect()
}
