//! Jira client against a local fake Jira served by axum

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use issuegrade_service::models::{Item, Narrative};
use issuegrade_service::rubric::{evaluate, RubricConfig};
use issuegrade_service::source::{DeliverySink, ItemSource, JiraClient, JiraConfig, SourceError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[derive(Clone, Default)]
struct FakeJira {
    search_calls: Arc<AtomicUsize>,
    rate_limited_once: Arc<AtomicUsize>,
    comments: Arc<Mutex<Vec<(String, Value)>>>,
    auth_headers: Arc<Mutex<Vec<String>>>,
}

fn issue(n: usize) -> Value {
    json!({
        "key": format!("ABC-{}", n),
        "fields": {
            "summary": format!("Issue number {}", n),
            "description": {
                "type": "doc",
                "version": 1,
                "content": [{ "type": "paragraph", "content": [{ "type": "text", "text": "Body" }] }]
            },
            "labels": ["backend"],
            "customfield_10016": 2.0,
            "issuetype": { "name": "Story" },
            "status": { "name": "To Do" }
        }
    })
}

async fn search(
    State(fake): State<FakeJira>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    fake.search_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        fake.auth_headers.lock().unwrap().push(auth.to_string());
    }

    let jql = params.get("jql").cloned().unwrap_or_default();
    if jql == "rate limited" && fake.rate_limited_once.fetch_add(1, Ordering::SeqCst) == 0 {
        return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "0")], "slow down").into_response();
    }
    if jql == "bad jql" {
        return (StatusCode::BAD_REQUEST, "Error in the JQL Query").into_response();
    }

    // 150 issues in total, served in pages
    let start: usize = params.get("startAt").and_then(|v| v.parse().ok()).unwrap_or(0);
    let max: usize = params.get("maxResults").and_then(|v| v.parse().ok()).unwrap_or(50);
    let issues: Vec<Value> = (start..(start + max).min(150)).map(issue).collect();
    Json(json!({ "startAt": start, "maxResults": max, "total": 150, "issues": issues })).into_response()
}

async fn get_issue(Path(key): Path<String>) -> Response {
    if key == "ABC-1" {
        Json(issue(1)).into_response()
    } else if key == "ODD 1/x" {
        Json(json!({ "key": key, "fields": { "summary": "Odd key" } })).into_response()
    } else if key == "SECRET-1" {
        StatusCode::FORBIDDEN.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn add_comment(State(fake): State<FakeJira>, Path(key): Path<String>, Json(body): Json<Value>) -> Response {
    fake.comments.lock().unwrap().push((key, body));
    (StatusCode::CREATED, Json(json!({ "id": "10000" }))).into_response()
}

async fn start_fake_jira() -> (JiraClient, FakeJira) {
    let fake = FakeJira::default();
    let app = Router::new()
        .route("/rest/api/3/search", get(search))
        .route("/rest/api/3/issue/:key", get(get_issue))
        .route("/rest/api/3/issue/:key/comment", post(add_comment))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = JiraConfig::new(format!("http://{}/", addr), "bot@example.com", "token");
    config.retry_base_delay = Duration::from_millis(1);
    (JiraClient::new(config).unwrap(), fake)
}

#[tokio::test]
async fn test_search_paginates_up_to_max() {
    let (client, fake) = start_fake_jira().await;

    let items = client.search("project = ABC", 120).await.unwrap();

    assert_eq!(items.len(), 120);
    assert_eq!(items[0].key, "ABC-0");
    assert_eq!(items[119].key, "ABC-119");
    assert_eq!(fake.search_calls.load(Ordering::SeqCst), 2);
    assert_eq!(items[0].description, "Body");
    assert_eq!(items[0].estimate, Some(2.0));
    assert_eq!(items[0].issue_type, "Story");
}

#[tokio::test]
async fn test_search_stops_at_total() {
    let (client, _fake) = start_fake_jira().await;
    let items = client.search("project = ABC", 500).await.unwrap();
    assert_eq!(items.len(), 150);
}

#[tokio::test]
async fn test_basic_auth_header() {
    let (client, fake) = start_fake_jira().await;
    client.search("project = ABC", 1).await.unwrap();

    let headers = fake.auth_headers.lock().unwrap().clone();
    // base64("bot@example.com:token")
    assert_eq!(headers, vec!["Basic Ym90QGV4YW1wbGUuY29tOnRva2Vu".to_string()]);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let (client, fake) = start_fake_jira().await;

    let items = client.search("rate limited", 5).await.unwrap();

    assert_eq!(items.len(), 5);
    assert_eq!(fake.search_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_error_statuses_are_mapped() {
    let (client, _fake) = start_fake_jira().await;

    assert!(matches!(client.get("NOPE-1").await, Err(SourceError::NotFound(_))));
    assert!(matches!(client.get("SECRET-1").await, Err(SourceError::Unauthorized(_))));
    match client.search("bad jql", 10).await {
        Err(SourceError::Api { status, message }) => {
            assert_eq!(status, 400);
            assert!(message.contains("JQL"));
        }
        other => panic!("unexpected result {:?}", other.map(|items| items.len())),
    }
}

#[tokio::test]
async fn test_get_issue() {
    let (client, _fake) = start_fake_jira().await;
    let item = client.get("ABC-1").await.unwrap();
    assert_eq!(item.key, "ABC-1");
    assert_eq!(item.labels, vec!["backend"]);
    assert_eq!(item.status.as_deref(), Some("To Do"));
}

#[tokio::test]
async fn test_deliver_posts_adf_comment() {
    let (client, fake) = start_fake_jira().await;
    let item = Item::new("ABC-7", "Fix login", "");
    let scored = evaluate(&item, &RubricConfig::default());
    let narrative = Narrative {
        assessment: "Needs work".to_string(),
        emoji: "🔧".to_string(),
        improvements: vec!["Description is empty".to_string()],
        ..Default::default()
    };

    client.deliver(&item, &scored, &narrative).await.unwrap();

    let comments = fake.comments.lock().unwrap().clone();
    assert_eq!(comments.len(), 1);
    let (key, body) = &comments[0];
    assert_eq!(key, "ABC-7");
    assert_eq!(body["body"]["type"], "doc");
    let first = &body["body"]["content"][0];
    assert_eq!(first["type"], "heading");
    assert_eq!(first["content"][0]["text"], "🔧 Feedback for ABC-7");
}

#[tokio::test]
async fn test_key_is_encoded_in_path() {
    let (client, _fake) = start_fake_jira().await;
    let item = client.get("ODD 1/x").await.unwrap();
    assert_eq!(item.key, "ODD 1/x");
    assert_eq!(item.summary, "Odd key");
}

/// Accepts connections, reads the request, then hangs up without answering
async fn start_hangup_server() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        }
    });
    (format!("http://{}", addr), accepted)
}

#[tokio::test]
async fn test_comment_is_not_resent_after_transport_error() {
    let (base_url, accepted) = start_hangup_server().await;
    let mut config = JiraConfig::new(base_url, "bot@example.com", "token");
    config.retry_base_delay = Duration::from_millis(1);
    let client = JiraClient::new(config).unwrap();

    let result = client.add_comment("ABC-1", "hello").await;

    assert!(matches!(result, Err(SourceError::Network(_))));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reads_are_retried_after_transport_error() {
    let (base_url, accepted) = start_hangup_server().await;
    let mut config = JiraConfig::new(base_url, "bot@example.com", "token");
    config.retry_base_delay = Duration::from_millis(1);
    let client = JiraClient::new(config).unwrap();

    assert!(matches!(client.get("ABC-1").await, Err(SourceError::Network(_))));
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_no_backoff_after_final_attempt() {
    let mut config = JiraConfig::new("http://127.0.0.1:1", "bot@example.com", "token");
    // Sleeps of 300ms and 600ms between attempts; a third 1200ms sleep
    // would follow the last attempt
    config.retry_base_delay = Duration::from_millis(300);
    config.timeout = Duration::from_secs(2);
    let client = JiraClient::new(config).unwrap();

    let started = std::time::Instant::now();
    assert!(matches!(client.get("ABC-1").await, Err(SourceError::Network(_))));
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let mut config = JiraConfig::new("http://127.0.0.1:1", "bot@example.com", "token");
    config.retry_base_delay = Duration::from_millis(1);
    config.timeout = Duration::from_secs(2);
    let client = JiraClient::new(config).unwrap();

    assert!(matches!(client.get("ABC-1").await, Err(SourceError::Network(_))));
}
