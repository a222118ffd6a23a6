//! Read-API tests over the in-memory graph store. No network, no database:
//! the ingestion workers sit idle and only the read paths are exercised.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use citegraph_common::entities::{AuthorRecord, LiteratureMetadata, RawReference};
use citegraph_common::Settings;
use citegraph_graph::{
    CitationTarget, GraphRepository, LiteratureCandidate, MemoryGraphStore,
};
use citegraph_ingestion::TaskCoordinator;
use citegraph_web::state::AppState;
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn test_app(graph: Arc<MemoryGraphStore>) -> Router {
    let mut settings = Settings::from_env();
    settings.object_store_base_url = Some("https://files.test.example".to_string());
    let graph_dyn: Arc<dyn GraphRepository> = graph;
    let services = citegraph_web::build_services(settings, graph_dyn).unwrap();
    let coordinator = TaskCoordinator::start(services.clone());
    citegraph_web::router::build_router(Arc::new(AppState::new(services, coordinator)))
}

fn stored(lid: &str, title: &str, year: i32) -> LiteratureCandidate {
    LiteratureCandidate {
        lid: lid.to_string(),
        identifiers: Default::default(),
        metadata: LiteratureMetadata {
            title: title.to_string(),
            authors: vec![AuthorRecord::new("Ashish Vaswani")],
            year: Some(year),
            ..Default::default()
        },
        content: citegraph_common::entities::ContentRecord {
            fulltext: Some("full body text".to_string()),
            ..Default::default()
        },
        references: vec![RawReference {
            raw_text: "Some cited work. 2015.".to_string(),
            parsed: None,
            source: "grobid".to_string(),
        }],
        task_info: serde_json::json!({"task_id": "t-1", "execution_status": "completed"}),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn literature_summary_omits_fulltext_and_raw_text() {
    let graph = Arc::new(MemoryGraphStore::new());
    graph
        .upsert_literature(&stored("2017-vaswani-aayn-1a2b", "Attention Is All You Need", 2017))
        .await
        .unwrap();
    let app = test_app(graph).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/literatures/2017-vaswani-aayn-1a2b")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["lid"], "2017-vaswani-aayn-1a2b");
    assert_eq!(json["reference_count"], 1);
    // Summary shape: no fulltext, no raw reference text.
    assert!(json["content"].get("fulltext").is_none());
    assert!(json["references"][0].get("raw_text").is_none());
}

#[tokio::test]
async fn fulltext_variant_includes_everything() {
    let graph = Arc::new(MemoryGraphStore::new());
    graph
        .upsert_literature(&stored("2017-vaswani-aayn-1a2b", "Attention Is All You Need", 2017))
        .await
        .unwrap();
    let app = test_app(graph).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/literatures/2017-vaswani-aayn-1a2b/fulltext")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["content"]["fulltext"], "full body text");
    assert_eq!(json["references"][0]["raw_text"], "Some cited work. 2015.");
}

#[tokio::test]
async fn missing_literature_is_404() {
    let app = test_app(Arc::new(MemoryGraphStore::new())).await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/literatures/unknown-lid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn batch_get_returns_known_records_only() {
    let graph = Arc::new(MemoryGraphStore::new());
    graph.upsert_literature(&stored("lid-a", "Paper A", 2019)).await.unwrap();
    graph.upsert_literature(&stored("lid-b", "Paper B", 2020)).await.unwrap();
    let app = test_app(graph).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/literatures?lids=lid-a,lid-b,missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn graph_read_returns_induced_subgraph() {
    let graph = Arc::new(MemoryGraphStore::new());
    graph.upsert_literature(&stored("lid-a", "Paper A", 2019)).await.unwrap();
    graph.upsert_literature(&stored("lid-b", "Paper B", 2020)).await.unwrap();
    graph
        .link_cites("lid-a", &CitationTarget::Literature("lid-b".into()), 0.9, "api")
        .await
        .unwrap();
    let app = test_app(graph).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/graphs")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"lids": ["lid-a"], "depth": 1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(json["edges"].as_array().unwrap().len(), 1);
    assert_eq!(json["edges"][0]["source"], "lid-a");
    assert_eq!(json["edges"][0]["target"], "lid-b");
}

#[tokio::test]
async fn graph_read_rejects_oversized_seed_sets() {
    let app = test_app(Arc::new(MemoryGraphStore::new())).await;
    let lids: Vec<String> = (0..21).map(|i| format!("lid-{i}")).collect();
    let body = serde_json::json!({ "lids": lids }).to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/graphs")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn resolve_without_any_handle_is_400() {
    let app = test_app(Arc::new(MemoryGraphStore::new())).await;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/resolve")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_input");
}

#[tokio::test]
async fn upload_grant_validates_and_issues_url() {
    let app = test_app(Arc::new(MemoryGraphStore::new())).await;

    let ok = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"filename": "paper.pdf", "content_type": "application/pdf", "size": 1024}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let json = body_json(ok).await;
    assert!(json["upload_url"]
        .as_str()
        .unwrap()
        .starts_with("https://files.test.example/uploads/"));

    let bad_mime = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"filename": "paper.pdf", "content_type": "text/html", "size": 1024}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad_mime.status(), StatusCode::BAD_REQUEST);

    let oversize = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"filename": "paper.pdf", "content_type": "application/pdf", "size": 99999999999}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(oversize.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn unknown_task_is_404() {
    let app = test_app(Arc::new(MemoryGraphStore::new())).await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/tasks/no-such-task")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
