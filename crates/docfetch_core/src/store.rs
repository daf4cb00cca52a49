use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::convert::{convert_document, render_file};
use crate::remote::RemoteDocument;
use crate::runtime::ResolvedPaths;

pub const INDEX_SCHEMA_VERSION: &str = "1";
pub const PLACEHOLDER_FILENAME: &str = "untitled";

/// One tracked local document. `local_id` and `relative_path` are fixed
/// for the document's life; the sync bookkeeping fields change on every
/// successful update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub local_id: Uuid,
    pub remote_id: String,
    pub connection_id: String,
    pub relative_path: String,
    pub title: String,
    pub remote_url: String,
    pub space_key: String,
    pub version: i64,
    pub synced_at: DateTime<Utc>,
    pub checksum: String,
    pub category: String,
    pub labels: Vec<String>,
}

/// The whole index, persisted as one JSON file and rewritten in full on
/// every mutation. At most one entry per distinct remote id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataIndex {
    pub schema_version: String,
    pub documents: Vec<DocumentMetadata>,
}

impl MetadataIndex {
    pub fn empty() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION.to_string(),
            documents: Vec::new(),
        }
    }
}

pub struct DocumentStore {
    root_dir: PathBuf,
    index_path: PathBuf,
}

impl DocumentStore {
    pub fn open(paths: &ResolvedPaths) -> Self {
        Self {
            root_dir: paths.root_dir.clone(),
            index_path: paths.index_path.clone(),
        }
    }

    pub fn absolute_path(&self, relative_path: &str) -> PathBuf {
        self.root_dir.join(relative_path)
    }

    /// First save of a remote document: render, write the file, append
    /// a fresh index entry.
    pub fn save(
        &self,
        document: &RemoteDocument,
        connection_id: &str,
        category: &str,
    ) -> Result<DocumentMetadata> {
        let mut index = self.load_index()?;
        if index
            .documents
            .iter()
            .any(|entry| entry.remote_id == document.id)
        {
            bail!(
                "remote id {} is already tracked; use update instead",
                document.id
            );
        }

        let synced_at = Utc::now();
        let content = render_file(&convert_document(document, synced_at));
        let relative_path = derive_relative_path(category, &document.title);
        self.write_document_file(&relative_path, &content)?;

        let metadata = DocumentMetadata {
            local_id: Uuid::new_v4(),
            remote_id: document.id.clone(),
            connection_id: connection_id.to_string(),
            relative_path,
            title: document.title.clone(),
            remote_url: document.web_url.clone(),
            space_key: document.space_key.clone(),
            version: document.version,
            synced_at,
            checksum: compute_checksum(&content),
            category: category.to_string(),
            labels: document.labels.clone(),
        };
        index.documents.push(metadata.clone());
        self.persist_index(&index)?;
        Ok(metadata)
    }

    /// Re-render onto the existing relative path. The filename never
    /// changes on update, even when the remote title did.
    pub fn update(
        &self,
        document: &RemoteDocument,
        existing: &DocumentMetadata,
    ) -> Result<DocumentMetadata> {
        let synced_at = Utc::now();
        let content = render_file(&convert_document(document, synced_at));
        self.write_document_file(&existing.relative_path, &content)?;

        let mut updated = existing.clone();
        updated.title = document.title.clone();
        updated.remote_url = document.web_url.clone();
        updated.space_key = document.space_key.clone();
        updated.version = document.version;
        updated.synced_at = synced_at;
        updated.checksum = compute_checksum(&content);
        updated.labels = document.labels.clone();

        let mut index = self.load_index()?;
        let entry = index
            .documents
            .iter_mut()
            .find(|entry| entry.local_id == existing.local_id)
            .ok_or_else(|| {
                anyhow::anyhow!("document {} is no longer tracked", existing.remote_id)
            })?;
        *entry = updated.clone();
        self.persist_index(&index)?;
        Ok(updated)
    }

    pub fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<DocumentMetadata>> {
        let index = self.load_index()?;
        Ok(index
            .documents
            .into_iter()
            .find(|entry| entry.remote_id == remote_id))
    }

    pub fn find_by_local_path(&self, relative_path: &str) -> Result<Option<DocumentMetadata>> {
        let needle = relative_path.replace('\\', "/");
        let index = self.load_index()?;
        Ok(index
            .documents
            .into_iter()
            .find(|entry| entry.relative_path == needle))
    }

    pub fn list(&self, category: Option<&str>) -> Result<Vec<DocumentMetadata>> {
        let index = self.load_index()?;
        let mut documents: Vec<DocumentMetadata> = index
            .documents
            .into_iter()
            .filter(|entry| category.is_none_or(|category| entry.category == category))
            .collect();
        documents.sort_by(|left, right| left.relative_path.cmp(&right.relative_path));
        Ok(documents)
    }

    /// Remove the index entry and, best-effort, the file. A file that is
    /// already gone is not an error.
    pub fn delete(&self, local_id: Uuid) -> Result<bool> {
        let mut index = self.load_index()?;
        let Some(position) = index
            .documents
            .iter()
            .position(|entry| entry.local_id == local_id)
        else {
            return Ok(false);
        };
        let entry = index.documents.remove(position);
        let absolute = self.absolute_path(&entry.relative_path);
        match fs::remove_file(&absolute) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to remove {}", absolute.display()));
            }
        }
        self.persist_index(&index)?;
        Ok(true)
    }

    pub fn load_index(&self) -> Result<MetadataIndex> {
        if !self.index_path.exists() {
            return Ok(MetadataIndex::empty());
        }
        let content = fs::read_to_string(&self.index_path)
            .with_context(|| format!("failed to read {}", self.index_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.index_path.display()))
    }

    fn persist_index(&self, index: &MetadataIndex) -> Result<()> {
        write_index(&self.index_path, index)
    }

    fn write_document_file(&self, relative_path: &str, content: &str) -> Result<()> {
        let absolute = self.absolute_path(relative_path);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&absolute, content)
            .with_context(|| format!("failed to write {}", absolute.display()))
    }
}

pub fn write_empty_index(index_path: &Path) -> Result<()> {
    write_index(index_path, &MetadataIndex::empty())
}

fn write_index(index_path: &Path, index: &MetadataIndex) -> Result<()> {
    if let Some(parent) = index_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered =
        serde_json::to_string_pretty(index).context("failed to serialize metadata index")?;
    fs::write(index_path, rendered + "\n")
        .with_context(|| format!("failed to write {}", index_path.display()))
}

pub fn derive_relative_path(category: &str, title: &str) -> String {
    format!("{}/{}.md", category.trim_matches('/'), sanitize_title(title))
}

/// Deterministic title → filename mapping. Path separators and shell
/// specials become dashes, runs collapse, the ends are trimmed, and the
/// result is capped at 100 characters.
pub fn sanitize_title(title: &str) -> String {
    let mut collapsed = String::with_capacity(title.len());
    let mut previous_dash = false;
    for ch in title.chars() {
        let mapped = if matches!(ch, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            '-'
        } else {
            ch
        };
        if mapped == '-' {
            if !previous_dash {
                collapsed.push('-');
            }
            previous_dash = true;
        } else {
            collapsed.push(mapped);
            previous_dash = false;
        }
    }

    let trimmed = collapsed.trim_matches(|ch: char| ch == '-' || ch.is_whitespace());
    let truncated: String = trimmed.chars().take(100).collect();
    let result = truncated
        .trim_matches(|ch: char| ch == '-' || ch.is_whitespace())
        .to_string();
    if result.is_empty() {
        PLACEHOLDER_FILENAME.to_string()
    } else {
        result
    }
}

/// Truncated SHA-256 of the final file content, for equality checks
/// only.
pub fn compute_checksum(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use tempfile::{TempDir, tempdir};

    use super::{DocumentStore, compute_checksum, derive_relative_path, sanitize_title};
    use crate::remote::RemoteDocument;
    use crate::runtime::{ResolvedPaths, ValueSource};

    fn paths(temp: &TempDir) -> ResolvedPaths {
        let root_dir: PathBuf = temp.path().join("root");
        let state_dir = root_dir.join(".docfetch");
        ResolvedPaths {
            index_path: state_dir.join("metadata.json"),
            config_path: state_dir.join("config.toml"),
            root_dir,
            state_dir,
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }

    fn document(id: &str, title: &str, version: i64) -> RemoteDocument {
        RemoteDocument {
            id: id.to_string(),
            title: title.to_string(),
            space_key: "ENG".to_string(),
            version,
            created_at: Utc.with_ymd_and_hms(2025, 11, 2, 9, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 0).unwrap(),
            author: "Dana".to_string(),
            content: format!("<p>{title} v{version}</p>"),
            web_url: format!("https://wiki.example.org/pages/{id}"),
            labels: vec!["docs".to_string()],
        }
    }

    #[test]
    fn sanitize_replaces_specials_and_keeps_something() {
        let sanitized = sanitize_title("A/B: C?");
        assert!(!sanitized.is_empty());
        for forbidden in ['/', '\\', ':', '*', '?', '"', '<', '>', '|'] {
            assert!(!sanitized.contains(forbidden), "found {forbidden:?} in {sanitized}");
        }
    }

    #[test]
    fn sanitize_all_symbol_title_falls_back_to_placeholder() {
        assert_eq!(sanitize_title("///???***"), "untitled");
        assert_eq!(sanitize_title("  "), "untitled");
    }

    #[test]
    fn sanitize_collapses_runs_and_caps_length() {
        assert_eq!(sanitize_title("a//b"), "a-b");
        let long = "x".repeat(300);
        assert_eq!(sanitize_title(&long).chars().count(), 100);
    }

    #[test]
    fn sanitize_is_deterministic() {
        assert_eq!(sanitize_title("Ops: Runbook"), sanitize_title("Ops: Runbook"));
    }

    #[test]
    fn checksum_is_short_and_content_sensitive() {
        let left = compute_checksum("alpha");
        assert_eq!(left.len(), 16);
        assert_ne!(left, compute_checksum("beta"));
        assert_eq!(left, compute_checksum("alpha"));
    }

    #[test]
    fn save_writes_file_and_tracks_metadata() {
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::open(&paths(&temp));

        let metadata = store
            .save(&document("123", "Getting Started", 1), "default", "guides")
            .expect("save");
        assert_eq!(metadata.relative_path, "guides/Getting Started.md");
        assert_eq!(metadata.version, 1);
        assert_eq!(metadata.checksum.len(), 16);

        let file = store.absolute_path(&metadata.relative_path);
        let content = fs::read_to_string(file).expect("read saved file");
        assert!(content.starts_with("---\n"));
        assert!(content.contains("Getting Started"));
    }

    #[test]
    fn save_then_update_keeps_exactly_one_entry_per_remote_id() {
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::open(&paths(&temp));

        let first = store
            .save(&document("123", "Guide", 1), "default", "guides")
            .expect("save");
        let updated = store
            .update(&document("123", "Guide (renamed)", 2), &first)
            .expect("update");

        assert_eq!(updated.local_id, first.local_id);
        assert_eq!(updated.relative_path, first.relative_path);
        assert_eq!(updated.version, 2);
        assert_ne!(updated.checksum, first.checksum);
        assert_eq!(updated.title, "Guide (renamed)");

        let index = store.load_index().expect("load index");
        let entries: Vec<_> = index
            .documents
            .iter()
            .filter(|entry| entry.remote_id == "123")
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, 2);
    }

    #[test]
    fn save_refuses_a_second_entry_for_the_same_remote_id() {
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::open(&paths(&temp));
        store
            .save(&document("123", "Guide", 1), "default", "guides")
            .expect("save");
        let error = store
            .save(&document("123", "Guide", 2), "default", "guides")
            .expect_err("must fail");
        assert!(error.to_string().contains("already tracked"));
    }

    #[test]
    fn lookups_by_remote_id_and_local_path() {
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::open(&paths(&temp));
        let metadata = store
            .save(&document("7", "Lookup Me", 1), "default", "pages")
            .expect("save");

        let by_id = store.find_by_remote_id("7").expect("find").expect("present");
        assert_eq!(by_id.local_id, metadata.local_id);

        let by_path = store
            .find_by_local_path("pages/Lookup Me.md")
            .expect("find")
            .expect("present");
        assert_eq!(by_path.remote_id, "7");

        assert!(store.find_by_remote_id("missing").expect("find").is_none());
        assert!(
            store
                .find_by_local_path("pages/untracked.md")
                .expect("find")
                .is_none()
        );
    }

    #[test]
    fn list_filters_by_category() {
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::open(&paths(&temp));
        store
            .save(&document("1", "Alpha", 1), "default", "guides")
            .expect("save");
        store
            .save(&document("2", "Beta", 1), "default", "runbooks")
            .expect("save");

        assert_eq!(store.list(None).expect("list").len(), 2);
        let guides = store.list(Some("guides")).expect("list");
        assert_eq!(guides.len(), 1);
        assert_eq!(guides[0].title, "Alpha");
    }

    #[test]
    fn delete_removes_entry_and_swallows_missing_file() {
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::open(&paths(&temp));
        let metadata = store
            .save(&document("9", "Ephemeral", 1), "default", "pages")
            .expect("save");

        // The user removed the file by hand; delete still succeeds.
        fs::remove_file(store.absolute_path(&metadata.relative_path)).expect("remove file");
        assert!(store.delete(metadata.local_id).expect("delete"));
        assert!(store.find_by_remote_id("9").expect("find").is_none());

        // Deleting an unknown id reports false, not an error.
        assert!(!store.delete(metadata.local_id).expect("delete again"));
    }

    #[test]
    fn colliding_titles_share_one_path() {
        // Known policy gap: two distinct remote ids with the same
        // sanitized title point at the same file; the second writer
        // wins. The index still tracks both.
        let temp = tempdir().expect("tempdir");
        let store = DocumentStore::open(&paths(&temp));

        let first = store
            .save(&document("100", "Setup: Guide", 1), "default", "pages")
            .expect("save first");
        let second = store
            .save(&document("200", "Setup/ Guide", 1), "default", "pages")
            .expect("save second");

        assert_eq!(first.relative_path, second.relative_path);
        assert_eq!(store.list(None).expect("list").len(), 2);

        let content = fs::read_to_string(store.absolute_path(&first.relative_path))
            .expect("read shared file");
        assert!(content.contains("remote_id: \"200\""));
    }

    #[test]
    fn relative_paths_live_under_the_category() {
        assert_eq!(derive_relative_path("guides", "Intro"), "guides/Intro.md");
        assert_eq!(
            derive_relative_path("guides/", "A/B"),
            "guides/A-B.md"
        );
    }
}
