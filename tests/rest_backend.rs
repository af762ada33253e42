use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use serde_json::json;
use talentgrid::backend::{DataSource, FetchError, Filter, MemoryBackend, RangeQuery, RestDataSource};
use talentgrid::cache::{CacheConfig, QueryCache};
use talentgrid::query::{OffersQuery, QueryContext, QueryUpdate};
use talentgrid::realtime::{ReconnectPolicy, SubscriptionManager};
use uuid::Uuid;

const API_KEY: &str = "anon-test-key";

fn source(server: &MockServer) -> RestDataSource {
    RestDataSource::new(&server.base_url(), API_KEY, Duration::from_secs(5)).expect("source")
}

fn offer_row(recruiter: Uuid, title: &str) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "recruiter_id": recruiter,
        "title": title,
        "company": "Ferrous Systems",
        "location": null,
        "is_active": true,
        "created_at": "2025-06-01T12:00:00Z"
    })
}

#[tokio::test]
async fn range_read_translates_to_rest_query() {
    let server = MockServer::start();
    let recruiter = Uuid::new_v4();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/rest/v1/job_offers")
            .header("apikey", API_KEY)
            .header("authorization", format!("Bearer {API_KEY}"))
            .query_param("select", "*")
            .query_param("recruiter_id", format!("eq.{recruiter}"))
            .query_param("order", "created_at.desc")
            .query_param("offset", "20")
            .query_param("limit", "10");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([offer_row(recruiter, "Backend engineer")]));
    });

    let query = RangeQuery::new("job_offers")
        .filter(Filter::eq("recruiter_id", recruiter.to_string()))
        .order_by("created_at", true)
        .range(20, 10);
    let rows = source(&server).fetch_range(&query).await.expect("rows");

    mock.assert();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], "Backend engineer");
}

#[tokio::test]
async fn single_row_lookup_filters_by_primary_key() {
    let server = MockServer::start();
    let (present, absent) = (Uuid::new_v4(), Uuid::new_v4());
    let found = server.mock(|when, then| {
        when.method("GET")
            .path("/rest/v1/profiles")
            .header("apikey", API_KEY)
            .query_param("select", "*")
            .query_param("id", format!("eq.{present}"))
            .query_param("limit", "1");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([{ "id": present, "full_name": "Ada Lovelace" }]));
    });
    let empty = server.mock(|when, then| {
        when.method("GET")
            .path("/rest/v1/profiles")
            .query_param("id", format!("eq.{absent}"))
            .query_param("limit", "1");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([]));
    });

    let source = source(&server);
    let row = source
        .fetch_one("profiles", present)
        .await
        .expect("lookup")
        .expect("row");
    assert_eq!(row["full_name"], "Ada Lovelace");
    assert_eq!(source.fetch_one("profiles", absent).await.expect("lookup"), None);

    found.assert();
    empty.assert();
}

#[tokio::test]
async fn server_errors_carry_status_and_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/rest/v1/profiles");
        then.status(503).body("upstream unavailable");
    });

    let err = source(&server)
        .fetch_range(&RangeQuery::new("profiles").range(0, 1))
        .await
        .expect_err("server error");

    match err {
        FetchError::Server { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn insert_requests_representation() {
    let server = MockServer::start();
    let stored = json!({ "id": Uuid::new_v4(), "content": "hello" });
    let mock = server.mock(|when, then| {
        when.method("POST")
            .path("/rest/v1/messages")
            .header("prefer", "return=representation")
            .json_body_includes(r#"{"content":"hello"}"#);
        then.status(201)
            .header("content-type", "application/json")
            .json_body(json!([stored.clone()]));
    });

    let written = source(&server)
        .insert("messages", json!({ "content": "hello" }))
        .await
        .expect("insert");

    mock.assert();
    assert_eq!(written, stored);
}

#[tokio::test]
async fn update_of_unknown_row_is_not_found() {
    let server = MockServer::start();
    let id = Uuid::new_v4();
    server.mock(|when, then| {
        when.method("PATCH")
            .path("/rest/v1/applications")
            .query_param("id", format!("eq.{id}"));
        then.status(200)
            .header("content-type", "application/json")
            .body("[]");
    });

    let err = source(&server)
        .update("applications", id, json!({ "status": "reviewed" }))
        .await
        .expect_err("missing row");
    assert!(matches!(err, FetchError::NotFound { .. }));
}

#[tokio::test]
async fn offers_query_reads_active_first_page_over_http() {
    let server = MockServer::start();
    let recruiter = Uuid::new_v4();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/rest/v1/job_offers")
            .query_param("recruiter_id", format!("eq.{recruiter}"))
            .query_param("is_active", "eq.true")
            .query_param("offset", "0")
            .query_param("limit", "2");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([
                offer_row(recruiter, "Platform engineer"),
                offer_row(recruiter, "SRE"),
            ]));
    });

    let realtime_backend = MemoryBackend::new();
    let realtime = SubscriptionManager::new(
        Arc::new(realtime_backend),
        ReconnectPolicy {
            initial_ms: 5,
            max_ms: 20,
            multiplier: 2.0,
            jitter_ms: 0,
        },
    );
    let ctx = QueryContext::new(
        Arc::new(QueryCache::new(&CacheConfig::default())),
        Arc::new(source(&server)),
        realtime,
    );

    let mut offers = ctx.query(OffersQuery::new(recruiter).active_only().with_limit(2));
    offers.mount();
    let update = offers.settle().await;

    mock.assert();
    assert!(matches!(update, Some(QueryUpdate::Fetched { fetched: 2, .. })));
    let titles: Vec<&str> = offers.data().iter().map(|o| o.title.as_str()).collect();
    assert_eq!(titles, vec!["Platform engineer", "SRE"]);
    assert!(offers.has_more());
}
