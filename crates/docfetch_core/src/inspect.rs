use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use similar::TextDiff;
use walkdir::WalkDir;

use crate::config::load_config;
use crate::convert::{convert_document, render_file};
use crate::remote::{ConfluenceClient, ConfluenceClientConfig, RemoteApi};
use crate::runtime::ResolvedPaths;
use crate::store::{DocumentStore, compute_checksum};

#[derive(Debug, Clone, Serialize)]
pub struct LocalFileStatus {
    pub relative_path: String,
    pub state: String,
    pub remote_id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalStatusReport {
    pub tracked: usize,
    pub modified: usize,
    pub not_tracked: usize,
    pub missing: usize,
    pub files: Vec<LocalFileStatus>,
    pub missing_paths: Vec<String>,
}

/// Walk the root for markdown files and classify each against the
/// index: tracked, modified on disk, or not tracked at all. Index
/// entries whose file vanished are listed separately.
pub fn local_status(paths: &ResolvedPaths) -> Result<LocalStatusReport> {
    let store = DocumentStore::open(paths);
    let index = store.load_index()?;
    let by_path: BTreeMap<&str, &crate::store::DocumentMetadata> = index
        .documents
        .iter()
        .map(|entry| (entry.relative_path.as_str(), entry))
        .collect();

    let mut files = Vec::new();
    let mut seen = BTreeSet::new();
    if paths.root_dir.exists() {
        for entry in WalkDir::new(&paths.root_dir).follow_links(false) {
            let entry = entry
                .with_context(|| format!("failed to walk {}", paths.root_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.starts_with(&paths.state_dir) {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let relative = path
                .strip_prefix(&paths.root_dir)
                .with_context(|| format!("failed to relativize {}", path.display()))?
                .to_string_lossy()
                .replace('\\', "/");
            seen.insert(relative.clone());

            match by_path.get(relative.as_str()) {
                Some(metadata) => {
                    let content = fs::read_to_string(path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let state = if compute_checksum(&content) == metadata.checksum {
                        "tracked"
                    } else {
                        "modified"
                    };
                    files.push(LocalFileStatus {
                        relative_path: relative,
                        state: state.to_string(),
                        remote_id: Some(metadata.remote_id.clone()),
                        title: Some(metadata.title.clone()),
                    });
                }
                None => files.push(LocalFileStatus {
                    relative_path: relative,
                    state: "not_tracked".to_string(),
                    remote_id: None,
                    title: None,
                }),
            }
        }
    }
    files.sort_by(|left, right| left.relative_path.cmp(&right.relative_path));

    let missing_paths: Vec<String> = index
        .documents
        .iter()
        .filter(|entry| !seen.contains(&entry.relative_path))
        .map(|entry| entry.relative_path.clone())
        .collect();

    let tracked = files.iter().filter(|file| file.state == "tracked").count();
    let modified = files.iter().filter(|file| file.state == "modified").count();
    let not_tracked = files
        .iter()
        .filter(|file| file.state == "not_tracked")
        .count();

    Ok(LocalStatusReport {
        tracked,
        modified,
        not_tracked,
        missing: missing_paths.len(),
        files,
        missing_paths,
    })
}

pub fn diff_document(paths: &ResolvedPaths, remote_id: &str) -> Result<Option<String>> {
    let config = load_config(&paths.config_path)?;
    let mut client = ConfluenceClient::new(ConfluenceClientConfig::from_config(&config))?;
    let store = DocumentStore::open(paths);
    diff_document_with_api(&store, &mut client, remote_id)
}

/// Unified diff between the stored file and a fresh render of the
/// current remote content. The stored sync instant is reused so the
/// header only differs when the document really changed.
pub fn diff_document_with_api<A: RemoteApi>(
    store: &DocumentStore,
    api: &mut A,
    remote_id: &str,
) -> Result<Option<String>> {
    let Some(metadata) = store.find_by_remote_id(remote_id)? else {
        bail!("remote id {remote_id} is not tracked");
    };
    let absolute = store.absolute_path(&metadata.relative_path);
    let local = fs::read_to_string(&absolute)
        .with_context(|| format!("failed to read {}", absolute.display()))?;

    let document = api.fetch_document(remote_id)?;
    let fresh = render_file(&convert_document(&document, metadata.synced_at));

    Ok(render_diff(&metadata.relative_path, "remote", &local, &fresh))
}

pub fn render_diff(
    old_label: &str,
    new_label: &str,
    old_content: &str,
    new_content: &str,
) -> Option<String> {
    if old_content == new_content {
        return None;
    }
    let diff = TextDiff::from_lines(old_content, new_content);
    let mut unified = diff.unified_diff();
    unified.context_radius(3).header(old_label, new_label);
    Some(unified.to_string())
}
