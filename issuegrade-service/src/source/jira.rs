//! Jira REST client
//!
//! Implements [`ItemSource`] (JQL search, issue fetch) and [`DeliverySink`]
//! (feedback comment) against the Jira Cloud REST API v3.
//!
//! # API Reference
//! - Search: `GET /rest/api/3/search?jql=...`
//! - Issue: `GET /rest/api/3/issue/{key}`
//! - Comment: `POST /rest/api/3/issue/{key}/comment` (body in Atlassian
//!   Document Format)

use super::{format_feedback_markdown, DeliverySink, ItemSource, SourceError};
use crate::models::{Item, Narrative};
use crate::rubric::ScoredResult;
use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for Jira API requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts per request (rate limits and transport errors are retried)
const MAX_ATTEMPTS: u32 = 3;

/// Jira caps page size at 100
const PAGE_SIZE: usize = 100;

const MAX_TITLE_LENGTH: usize = 500;
const MAX_DESCRIPTION_LENGTH: usize = 50_000;

/// Custom fields commonly used for story points, checked in order
const ESTIMATE_FIELDS: &[&str] = &["customfield_10016", "customfield_10004", "customfield_10002"];

const SEARCH_FIELDS: &str = "summary,description,labels,assignee,issuetype,status,timetracking,\
     customfield_10016,customfield_10004,customfield_10002";

/// Connection settings for a Jira site
#[derive(Debug, Clone)]
pub struct JiraConfig {
    /// e.g. `https://example.atlassian.net`
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub timeout: Duration,
    /// Base delay for retry backoff (doubles per attempt)
    pub retry_base_delay: Duration,
}

impl JiraConfig {
    pub fn new(base_url: impl Into<String>, email: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            email: email.into(),
            api_token: api_token.into(),
            timeout: DEFAULT_TIMEOUT,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Jira client implementing both item source and comment sink
pub struct JiraClient {
    http_client: Client,
    config: JiraConfig,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<RawIssue>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    key: String,
    #[serde(default)]
    fields: Value,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Result<Self, SourceError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SourceError::NotConfigured(format!("Invalid Jira base URL {}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::NotConfigured(format!(
                "Invalid Jira base URL {}",
                config.base_url
            )));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http_client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
            base_url,
        })
    }

    /// Base URL with percent-encoded path segments appended
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::NotConfigured(format!("Invalid Jira base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request, retrying rate limits and transport failures
    ///
    /// A non-idempotent request is retried after a transport error only
    /// when the connection was never established.
    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, SourceError> {
        let url = self.endpoint(segments)?;
        let idempotent = method.is_idempotent();
        let mut last_error = SourceError::Network(format!("No attempt made for {}", url));

        for attempt in 0..MAX_ATTEMPTS {
            let last_attempt = attempt + 1 == MAX_ATTEMPTS;
            let mut request = self
                .http_client
                .request(method.clone(), url.clone())
                .basic_auth(&self.config.email, Some(&self.config.api_token))
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            let backoff = self.config.retry_base_delay * 2u32.pow(attempt);

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let error = SourceError::Network(format!("{} {} failed: {}", method, url, e));
                    if last_attempt || !(idempotent || e.is_connect()) {
                        warn!(url = %url, attempt, error = %e, "Jira request failed");
                        return Err(error);
                    }
                    warn!(url = %url, attempt, error = %e, "Jira request failed, retrying");
                    last_error = error;
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                if status == StatusCode::NO_CONTENT {
                    return Ok(Value::Null);
                }
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| SourceError::Parse(format!("Invalid JSON from {}: {}", url, e)));
            }

            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .headers()
                        .get(header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or(backoff);
                    warn!(url = %url, attempt, retry_after_ms = retry_after.as_millis() as u64, "Jira rate limited");
                    last_error = SourceError::RateLimited {
                        retry_after_secs: retry_after.as_secs(),
                    };
                    if !last_attempt {
                        tokio::time::sleep(retry_after).await;
                    }
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(SourceError::Unauthorized(format!("{} for {}", status, url)));
                }
                StatusCode::NOT_FOUND => {
                    return Err(SourceError::NotFound(format!("Resource not found: {}", url)));
                }
                _ => {
                    let text = response.text().await.unwrap_or_default();
                    return Err(SourceError::Api {
                        status: status.as_u16(),
                        message: text.chars().take(200).collect(),
                    });
                }
            }
        }

        Err(last_error)
    }

    /// Post a markdown comment (converted to ADF)
    pub async fn add_comment(&self, item_key: &str, markdown: &str) -> Result<(), SourceError> {
        let payload = json!({ "body": markdown_to_adf(markdown) });
        self.request(
            Method::POST,
            &["rest", "api", "3", "issue", item_key, "comment"],
            &[],
            Some(&payload),
        )
        .await?;
        debug!(item_key, "Comment added");
        Ok(())
    }
}

#[async_trait]
impl ItemSource for JiraClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Item>, SourceError> {
        debug!(jql = query, max_results, "Searching Jira");
        let mut items = Vec::new();

        while items.len() < max_results {
            let page_size = (max_results - items.len()).min(PAGE_SIZE);
            let params = [
                ("jql", query.to_string()),
                ("fields", SEARCH_FIELDS.to_string()),
                ("maxResults", page_size.to_string()),
                ("startAt", items.len().to_string()),
            ];
            let value = self.request(Method::GET, &["rest", "api", "3", "search"], &params, None).await?;
            let page: SearchResponse = serde_json::from_value(value)
                .map_err(|e| SourceError::Parse(format!("Unexpected search response: {}", e)))?;

            let fetched = page.issues.len();
            items.extend(page.issues.into_iter().map(|raw| item_from_fields(raw.key, &raw.fields)));

            let exhausted = page.total.map(|total| items.len() >= total).unwrap_or(true);
            if fetched == 0 || fetched < page_size || exhausted {
                break;
            }
        }

        items.truncate(max_results);
        debug!(found = items.len(), "Jira search complete");
        Ok(items)
    }

    async fn get(&self, item_key: &str) -> Result<Item, SourceError> {
        let value = self
            .request(Method::GET, &["rest", "api", "3", "issue", item_key], &[], None)
            .await?;
        let raw: RawIssue = serde_json::from_value(value)
            .map_err(|e| SourceError::Parse(format!("Unexpected issue response: {}", e)))?;
        Ok(item_from_fields(raw.key, &raw.fields))
    }
}

#[async_trait]
impl DeliverySink for JiraClient {
    async fn deliver(&self, item: &Item, scored: &ScoredResult, narrative: &Narrative) -> Result<(), SourceError> {
        let body = format_feedback_markdown(item, scored, narrative);
        self.add_comment(&item.key, &body).await
    }
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

/// Map a Jira `fields` object onto an [`Item`]
pub(crate) fn item_from_fields(key: String, fields: &Value) -> Item {
    let summary = fields.get("summary").and_then(Value::as_str).unwrap_or_default();

    let description = match fields.get("description") {
        Some(Value::String(text)) => text.clone(),
        Some(adf @ Value::Object(_)) => adf_to_text(adf),
        _ => String::new(),
    };

    let labels = fields
        .get("labels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let assignee = fields.get("assignee").and_then(|a| {
        a.get("displayName")
            .or_else(|| a.get("emailAddress"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    Item {
        key,
        summary: truncate_with_ellipsis(summary, MAX_TITLE_LENGTH),
        description: truncate_with_ellipsis(&description, MAX_DESCRIPTION_LENGTH),
        labels,
        estimate: estimate_from_fields(fields),
        issue_type: fields
            .pointer("/issuetype/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status: fields
            .pointer("/status/name")
            .and_then(Value::as_str)
            .map(str::to_string),
        assignee,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Story points first, then the time-tracking original estimate
fn estimate_from_fields(fields: &Value) -> Option<f64> {
    ESTIMATE_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name))
        .find_map(value_as_f64)
        .or_else(|| {
            fields
                .pointer("/timetracking/originalEstimate")
                .and_then(value_as_f64)
        })
}

/// Plain text of an Atlassian Document Format tree (text nodes joined by spaces)
pub(crate) fn adf_to_text(adf: &Value) -> String {
    fn collect<'a>(node: &'a Value, parts: &mut Vec<&'a str>) {
        match node {
            Value::Object(map) => {
                if map.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = map.get("text").and_then(Value::as_str) {
                        parts.push(text);
                    }
                }
                if let Some(content) = map.get("content") {
                    collect(content, parts);
                }
            }
            Value::Array(children) => {
                for child in children {
                    collect(child, parts);
                }
            }
            _ => {}
        }
    }

    let mut parts = Vec::new();
    collect(adf, &mut parts);
    parts.join(" ")
}

fn text_node(text: &str) -> Value {
    json!([{ "type": "text", "text": text }])
}

/// Line-based markdown → ADF: headings, bullets, paragraphs
pub(crate) fn markdown_to_adf(markdown: &str) -> Value {
    let content: Vec<Value> = markdown
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let heading_level = line.chars().take_while(|c| *c == '#').count();
            if (1..=3).contains(&heading_level) {
                json!({
                    "type": "heading",
                    "attrs": { "level": heading_level },
                    "content": text_node(line[heading_level..].trim()),
                })
            } else if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
                json!({
                    "type": "bulletList",
                    "content": [{
                        "type": "listItem",
                        "content": [{ "type": "paragraph", "content": text_node(rest.trim()) }],
                    }],
                })
            } else {
                json!({ "type": "paragraph", "content": text_node(line) })
            }
        })
        .collect();

    json!({ "type": "doc", "version": 1, "content": content })
}
