use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url, blocking::Client};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "docfetch/0.1";

/// A page as fetched from the remote service. Immutable once built.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    pub id: String,
    pub title: String,
    pub space_key: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: String,
    pub content: String,
    pub web_url: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteSearchHit {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub space_key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Failure classes the sync layer must be able to tell apart.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote document not found")]
    NotFound,
    #[error("authentication with the remote service failed")]
    Auth,
    #[error("remote service rate limit exceeded")]
    RateLimited,
    #[error("remote service returned HTTP {0}")]
    Http(u16),
    #[error("failed to reach remote service: {0}")]
    Transport(String),
    #[error("failed to decode remote response: {0}")]
    Decode(String),
}

/// Short tag for a failed sync item, derived from the error chain.
pub fn classify_error(error: &anyhow::Error) -> &'static str {
    match error.downcast_ref::<RemoteError>() {
        Some(RemoteError::NotFound) => "not_found",
        Some(RemoteError::Auth) => "auth",
        Some(RemoteError::RateLimited) => "rate_limited",
        Some(RemoteError::Http(_)) => "http",
        Some(RemoteError::Transport(_)) => "transport",
        Some(RemoteError::Decode(_)) => "decode",
        None => "error",
    }
}

/// Read-side seam to the remote service. Sync and fetch paths are
/// generic over this so tests drive them with an in-memory fake.
pub trait RemoteApi {
    fn fetch_document(&mut self, id: &str) -> Result<RemoteDocument>;
    fn find_content_id(&mut self, space_key: &str, title: &str) -> Result<Option<String>>;
    fn search(&mut self, query: &str, limit: usize) -> Result<Vec<RemoteSearchHit>>;
    fn request_count(&self) -> usize;
}

/// Where a page URL points: directly at a content id, or at a title
/// that needs one lookup to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLocator {
    Id(String),
    SpaceTitle { space_key: String, title: String },
}

pub fn parse_page_url(url: &str) -> Option<PageLocator> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<String> = parsed
        .path_segments()
        .map(|segments| segments.map(ToString::to_string).collect())
        .unwrap_or_default();

    // .../pages/<id>/<slug> and .../pages/viewpage.action?pageId=<id>
    for (key, value) in parsed.query_pairs() {
        if key.eq_ignore_ascii_case("pageid") && value.chars().all(|ch| ch.is_ascii_digit()) {
            return Some(PageLocator::Id(value.into_owned()));
        }
    }
    if let Some(position) = segments.iter().position(|segment| segment == "pages")
        && let Some(candidate) = segments.get(position + 1)
        && !candidate.is_empty()
        && candidate.chars().all(|ch| ch.is_ascii_digit())
    {
        return Some(PageLocator::Id(candidate.clone()));
    }

    // .../display/<SPACE>/<Title+With+Pluses>
    if let Some(position) = segments.iter().position(|segment| segment == "display")
        && let Some(space_key) = segments.get(position + 1)
        && let Some(raw_title) = segments.get(position + 2)
        && !space_key.is_empty()
        && !raw_title.is_empty()
    {
        let decoded = urlencoding::decode(raw_title)
            .map(std::borrow::Cow::into_owned)
            .unwrap_or_else(|_| raw_title.clone());
        let title = decoded.replace('+', " ").trim().to_string();
        if !title.is_empty() {
            return Some(PageLocator::SpaceTitle {
                space_key: space_key.clone(),
                title,
            });
        }
    }

    None
}

#[derive(Debug, Clone)]
pub struct ConfluenceClientConfig {
    pub base_url: String,
    pub user: Option<String>,
    pub token: Option<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl ConfluenceClientConfig {
    pub fn from_env() -> Self {
        Self::from_env_with_defaults("", DEFAULT_USER_AGENT)
    }

    pub fn from_config(config: &crate::config::ToolConfig) -> Self {
        let base_default = config.connection.base_url.as_deref().unwrap_or("");
        Self::from_env_with_defaults(base_default, &config.user_agent())
    }

    fn from_env_with_defaults(base_url_default: &str, user_agent_default: &str) -> Self {
        Self {
            base_url: env_value("CONFLUENCE_BASE_URL", base_url_default),
            user: env_optional("CONFLUENCE_USER"),
            token: env_optional("CONFLUENCE_TOKEN"),
            user_agent: env_value("CONFLUENCE_USER_AGENT", user_agent_default),
            timeout_ms: env_value_u64("CONFLUENCE_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("CONFLUENCE_RATE_LIMIT_MS", 250),
            max_retries: env_value_usize("CONFLUENCE_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("CONFLUENCE_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct ConfluenceClient {
    client: Client,
    config: ConfluenceClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl ConfluenceClient {
    pub fn from_env() -> Result<Self> {
        Self::new(ConfluenceClientConfig::from_env())
    }

    pub fn new(config: ConfluenceClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build remote HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn request_json(&mut self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        if self.config.base_url.trim().is_empty() {
            return Err(RemoteError::Transport(
                "CONFLUENCE_BASE_URL is not configured".to_string(),
            )
            .into());
        }
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let mut request = self
                .client
                .get(&url)
                .header("User-Agent", self.config.user_agent.clone())
                .query(query);
            request = match (&self.config.user, &self.config.token) {
                (Some(user), token) => request.basic_auth(user, token.as_deref()),
                (None, Some(token)) => request.bearer_auth(token),
                (None, None) => request,
            };

            let response = request.send();
            self.request_count += 1;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(RemoteError::Auth.into());
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(RemoteError::NotFound.into());
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        if attempt < self.config.max_retries {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        if status == StatusCode::TOO_MANY_REQUESTS {
                            return Err(RemoteError::RateLimited.into());
                        }
                        return Err(RemoteError::Http(status.as_u16()).into());
                    }
                    if !status.is_success() {
                        return Err(RemoteError::Http(status.as_u16()).into());
                    }
                    return response
                        .json::<Value>()
                        .map_err(|error| RemoteError::Decode(error.to_string()).into());
                }
                Err(error) => {
                    if attempt < self.config.max_retries
                        && (error.is_timeout() || error.is_connect())
                    {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(RemoteError::Transport(error.to_string()).into());
                }
            }
        }

        Err(RemoteError::Transport("retry budget exhausted".to_string()).into())
    }

    fn apply_rate_limit(&mut self) {
        if let Some(last) = self.last_request_at {
            let minimum = Duration::from_millis(self.config.rate_limit_ms);
            let elapsed = last.elapsed();
            if elapsed < minimum {
                sleep(minimum - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
    }

    fn wait_before_retry(&self, attempt: usize) {
        sleep(Duration::from_millis(
            self.config.retry_delay_ms.saturating_mul(attempt as u64 + 1),
        ));
    }
}

impl RemoteApi for ConfluenceClient {
    fn fetch_document(&mut self, id: &str) -> Result<RemoteDocument> {
        let payload = self.request_json(
            &format!("/rest/api/content/{id}"),
            &[(
                "expand",
                "body.storage,version,space,history,metadata.labels".to_string(),
            )],
        )?;
        parse_document(&payload, &self.config.base_url)
    }

    fn find_content_id(&mut self, space_key: &str, title: &str) -> Result<Option<String>> {
        let payload = self.request_json(
            "/rest/api/content",
            &[
                ("spaceKey", space_key.to_string()),
                ("title", title.to_string()),
                ("limit", "1".to_string()),
            ],
        )?;
        let id = payload
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|first| content_id(first));
        Ok(id)
    }

    fn search(&mut self, query: &str, limit: usize) -> Result<Vec<RemoteSearchHit>> {
        let cql = format!("text ~ \"{}\" and type = page", query.replace('"', "\\\""));
        let payload = self.request_json(
            "/rest/api/search",
            &[
                ("cql", cql),
                ("limit", limit.max(1).to_string()),
            ],
        )?;
        let mut hits = Vec::new();
        if let Some(results) = payload.get("results").and_then(Value::as_array) {
            for result in results {
                let content = result.get("content").unwrap_or(result);
                let Some(id) = content_id(content) else {
                    continue;
                };
                hits.push(RemoteSearchHit {
                    id,
                    title: string_at(content, &["title"]).unwrap_or_default(),
                    excerpt: string_at(result, &["excerpt"]).unwrap_or_default(),
                    space_key: string_at(result, &["resultGlobalContainer", "title"])
                        .or_else(|| string_at(content, &["space", "key"]))
                        .unwrap_or_default(),
                    last_modified: string_at(result, &["lastModified"])
                        .as_deref()
                        .and_then(parse_timestamp),
                });
            }
        }
        Ok(hits)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn parse_document(payload: &Value, base_url: &str) -> Result<RemoteDocument> {
    let id = content_id(payload)
        .ok_or_else(|| RemoteError::Decode("content id missing".to_string()))?;
    let title = string_at(payload, &["title"]).unwrap_or_default();
    let content = string_at(payload, &["body", "storage", "value"])
        .ok_or_else(|| RemoteError::Decode("storage body missing".to_string()))?;

    let version = payload
        .get("version")
        .and_then(|version| version.get("number"))
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let updated_at = string_at(payload, &["version", "when"])
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(DateTime::UNIX_EPOCH);
    let created_at = string_at(payload, &["history", "createdDate"])
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(updated_at);
    let author = string_at(payload, &["version", "by", "displayName"])
        .or_else(|| string_at(payload, &["history", "createdBy", "displayName"]))
        .unwrap_or_default();

    let web_base = string_at(payload, &["_links", "base"])
        .unwrap_or_else(|| base_url.trim_end_matches('/').to_string());
    let web_url = match string_at(payload, &["_links", "webui"]) {
        Some(webui) => format!("{}{}", web_base.trim_end_matches('/'), webui),
        None => web_base,
    };

    let labels = payload
        .get("metadata")
        .and_then(|metadata| metadata.get("labels"))
        .and_then(|labels| labels.get("results"))
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|label| string_at(label, &["name"]))
                .collect()
        })
        .unwrap_or_default();

    Ok(RemoteDocument {
        id,
        title,
        space_key: string_at(payload, &["space", "key"]).unwrap_or_default(),
        version,
        created_at,
        updated_at,
        author,
        content,
        web_url,
        labels,
    })
}

fn content_id(value: &Value) -> Option<String> {
    match value.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(key)?;
    }
    cursor.as_str().map(ToString::to_string)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn env_value(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::{PageLocator, RemoteError, classify_error, parse_document, parse_page_url};

    #[test]
    fn page_urls_resolve_to_ids() {
        assert_eq!(
            parse_page_url("https://wiki.example.org/wiki/spaces/ENG/pages/123456/Release+Notes"),
            Some(PageLocator::Id("123456".to_string()))
        );
        assert_eq!(
            parse_page_url("https://wiki.example.org/pages/viewpage.action?pageId=42"),
            Some(PageLocator::Id("42".to_string()))
        );
    }

    #[test]
    fn display_urls_resolve_to_space_and_title() {
        assert_eq!(
            parse_page_url("https://wiki.example.org/display/ENG/Release+Notes"),
            Some(PageLocator::SpaceTitle {
                space_key: "ENG".to_string(),
                title: "Release Notes".to_string()
            })
        );
    }

    #[test]
    fn unrelated_urls_are_rejected() {
        assert_eq!(parse_page_url("https://example.org/not-a-wiki"), None);
        assert_eq!(parse_page_url("not a url"), None);
    }

    #[test]
    fn document_payload_parses_fields_and_labels() {
        let payload = serde_json::json!({
            "id": "123",
            "title": "Runbook",
            "space": {"key": "OPS"},
            "version": {
                "number": 7,
                "when": "2026-03-01T09:30:00.000Z",
                "by": {"displayName": "Dana"}
            },
            "history": {"createdDate": "2025-11-11T08:00:00.000Z"},
            "body": {"storage": {"value": "<p>hello</p>"}},
            "metadata": {"labels": {"results": [{"name": "ops"}, {"name": "runbook"}]}},
            "_links": {"base": "https://wiki.example.org", "webui": "/spaces/OPS/pages/123"}
        });
        let document = parse_document(&payload, "https://fallback.example").expect("parse");
        assert_eq!(document.id, "123");
        assert_eq!(document.space_key, "OPS");
        assert_eq!(document.version, 7);
        assert_eq!(document.author, "Dana");
        assert_eq!(document.labels, vec!["ops".to_string(), "runbook".to_string()]);
        assert_eq!(
            document.web_url,
            "https://wiki.example.org/spaces/OPS/pages/123"
        );
    }

    #[test]
    fn missing_storage_body_is_a_decode_error() {
        let payload = serde_json::json!({"id": "1", "title": "x"});
        let error = parse_document(&payload, "").expect_err("must fail");
        assert_eq!(classify_error(&error), "decode");
    }

    #[test]
    fn error_classification_covers_the_taxonomy() {
        assert_eq!(classify_error(&RemoteError::NotFound.into()), "not_found");
        assert_eq!(classify_error(&RemoteError::Auth.into()), "auth");
        assert_eq!(
            classify_error(&RemoteError::RateLimited.into()),
            "rate_limited"
        );
        assert_eq!(
            classify_error(&anyhow::anyhow!("something else")),
            "error"
        );
    }
}
