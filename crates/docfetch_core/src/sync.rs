use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use serde::Serialize;

use crate::config::load_config;
use crate::remote::{
    ConfluenceClient, ConfluenceClientConfig, PageLocator, RemoteApi, RemoteError,
    RemoteSearchHit, classify_error, parse_page_url,
};
use crate::runtime::ResolvedPaths;
use crate::store::{DocumentMetadata, DocumentStore};

/// Cooperative cancellation for bulk sync. Checked before each
/// document's fetch; already-synced documents stay committed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub category: Option<String>,
    pub remote_ids: Vec<String>,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItemResult {
    pub remote_id: String,
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub requested: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub request_count: usize,
    pub items: Vec<SyncItemResult>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub action: String,
    pub metadata: DocumentMetadata,
    pub request_count: usize,
}

pub fn sync_all(
    paths: &ResolvedPaths,
    options: &SyncOptions,
    cancel: &CancelFlag,
) -> Result<SyncReport> {
    let config = load_config(&paths.config_path)?;
    let mut client = ConfluenceClient::new(ConfluenceClientConfig::from_config(&config))?;
    let store = DocumentStore::open(paths);
    sync_all_with_api(&store, &mut client, options, cancel)
}

/// Sequential bulk sync over tracked documents. Per-item failures are
/// counted and classified, never abort siblings.
pub fn sync_all_with_api<A: RemoteApi>(
    store: &DocumentStore,
    api: &mut A,
    options: &SyncOptions,
    cancel: &CancelFlag,
) -> Result<SyncReport> {
    let mut entries = store.list(options.category.as_deref())?;
    if !options.remote_ids.is_empty() {
        entries.retain(|entry| {
            options
                .remote_ids
                .iter()
                .any(|id| id == &entry.remote_id)
        });
    }

    let mut report = SyncReport {
        success: true,
        requested: entries.len(),
        synced: 0,
        skipped: 0,
        failed: 0,
        cancelled: false,
        request_count: 0,
        items: Vec::new(),
        errors: Vec::new(),
    };

    for entry in &entries {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match sync_entry(store, api, entry, options.force) {
            Ok(item) => {
                match item.action.as_str() {
                    "updated" => report.synced += 1,
                    "skipped" => report.skipped += 1,
                    _ => {}
                }
                report.items.push(item);
            }
            Err(error) => {
                report.failed += 1;
                report.errors.push(format!("{}: {error:#}", entry.title));
                report.items.push(SyncItemResult {
                    remote_id: entry.remote_id.clone(),
                    title: entry.title.clone(),
                    action: "failed".to_string(),
                    detail: Some(classify_error(&error).to_string()),
                });
            }
        }
    }

    report.request_count = api.request_count();
    // Partial completion through cancellation is a reported outcome,
    // not a failure.
    report.success = report.failed == 0;
    Ok(report)
}

fn sync_entry<A: RemoteApi>(
    store: &DocumentStore,
    api: &mut A,
    entry: &DocumentMetadata,
    force: bool,
) -> Result<SyncItemResult> {
    let document = api.fetch_document(&entry.remote_id)?;

    if !force && document.version <= entry.version {
        return Ok(SyncItemResult {
            remote_id: entry.remote_id.clone(),
            title: entry.title.clone(),
            action: "skipped".to_string(),
            detail: Some("remote version not newer".to_string()),
        });
    }
    if !store.absolute_path(&entry.relative_path).exists() {
        return Ok(SyncItemResult {
            remote_id: entry.remote_id.clone(),
            title: entry.title.clone(),
            action: "skipped".to_string(),
            detail: Some("local file missing".to_string()),
        });
    }

    let updated = store.update(&document, entry)?;
    Ok(SyncItemResult {
        remote_id: updated.remote_id.clone(),
        title: updated.title.clone(),
        action: "updated".to_string(),
        detail: None,
    })
}

pub fn fetch_by_url(paths: &ResolvedPaths, url: &str, category: Option<&str>) -> Result<FetchReport> {
    let config = load_config(&paths.config_path)?;
    let mut client = ConfluenceClient::new(ConfluenceClientConfig::from_config(&config))?;
    let store = DocumentStore::open(paths);
    let connection_id = config.connection_id();
    let category = category
        .map(ToString::to_string)
        .unwrap_or_else(|| config.default_category());
    fetch_by_url_with_api(&store, &mut client, url, &connection_id, &category)
}

/// Single-document path: resolve the URL, fetch, save or refresh. An
/// explicit fetch always rewrites the local copy; errors surface to the
/// caller directly.
pub fn fetch_by_url_with_api<A: RemoteApi>(
    store: &DocumentStore,
    api: &mut A,
    url: &str,
    connection_id: &str,
    category: &str,
) -> Result<FetchReport> {
    let locator =
        parse_page_url(url).ok_or_else(|| anyhow!("unrecognized page URL: {url}"))?;
    let id = match locator {
        PageLocator::Id(id) => id,
        PageLocator::SpaceTitle { space_key, title } => api
            .find_content_id(&space_key, &title)?
            .ok_or(RemoteError::NotFound)?,
    };
    let document = api.fetch_document(&id)?;

    let (action, metadata) = match store.find_by_remote_id(&document.id)? {
        Some(existing) => ("updated", store.update(&document, &existing)?),
        None => ("created", store.save(&document, connection_id, category)?),
    };
    Ok(FetchReport {
        action: action.to_string(),
        metadata,
        request_count: api.request_count(),
    })
}

pub fn search_remote(
    paths: &ResolvedPaths,
    query: &str,
    limit: usize,
) -> Result<Vec<RemoteSearchHit>> {
    let config = load_config(&paths.config_path)?;
    let mut client = ConfluenceClient::new(ConfluenceClientConfig::from_config(&config))?;
    client.search(query, limit)
}
