use chrono::{DateTime, SecondsFormat, Utc};

use crate::remote::RemoteDocument;

/// Structured header embedded at the top of every saved file.
#[derive(Debug, Clone, PartialEq)]
pub struct Frontmatter {
    pub title: String,
    pub remote_id: String,
    pub remote_url: String,
    pub space_key: String,
    pub version: i64,
    pub synced_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub author: String,
    pub labels: Vec<String>,
}

/// `synced_at` is the conversion instant supplied by the caller;
/// `modified_at` is the remote document's own last-update time.
pub fn build_frontmatter(document: &RemoteDocument, synced_at: DateTime<Utc>) -> Frontmatter {
    Frontmatter {
        title: document.title.clone(),
        remote_id: document.id.clone(),
        remote_url: document.web_url.clone(),
        space_key: document.space_key.clone(),
        version: document.version,
        synced_at,
        modified_at: document.updated_at,
        author: document.author.clone(),
        labels: document.labels.clone(),
    }
}

pub fn render_frontmatter(frontmatter: &Frontmatter) -> String {
    let mut lines = vec![
        "---".to_string(),
        format!("title: \"{}\"", escape_value(&frontmatter.title)),
        format!("remote_id: \"{}\"", escape_value(&frontmatter.remote_id)),
        format!("remote_url: \"{}\"", escape_value(&frontmatter.remote_url)),
        format!("space_key: \"{}\"", escape_value(&frontmatter.space_key)),
        format!("version: {}", frontmatter.version),
        format!("synced_at: \"{}\"", render_timestamp(frontmatter.synced_at)),
        format!(
            "modified_at: \"{}\"",
            render_timestamp(frontmatter.modified_at)
        ),
        format!("author: \"{}\"", escape_value(&frontmatter.author)),
    ];
    if frontmatter.labels.is_empty() {
        lines.push("labels: []".to_string());
    } else {
        lines.push("labels:".to_string());
        for label in &frontmatter.labels {
            lines.push(format!("  - \"{}\"", escape_value(label)));
        }
    }
    lines.push("---".to_string());
    lines.join("\n")
}

fn render_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
