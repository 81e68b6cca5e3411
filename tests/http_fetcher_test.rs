#![cfg(feature = "remote")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metaver_lib::{
    content_hash, Environment, HttpFetcher, Manifest, MetadataError, MetadataFetcher,
    VersionRegistry,
};

/// A minimal object store: GET and PUT of documents by path.
#[derive(Default)]
struct Bucket {
    documents: Mutex<HashMap<String, String>>,
    put_auth: Mutex<Vec<Option<String>>>,
}

async fn get_document(State(bucket): State<Arc<Bucket>>, Path(path): Path<String>) -> Response {
    match bucket.documents.lock().unwrap().get(&path) {
        Some(doc) => doc.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_document(
    State(bucket): State<Arc<Bucket>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    bucket.put_auth.lock().unwrap().push(auth);
    bucket.documents.lock().unwrap().insert(path, body);
    StatusCode::OK
}

async fn serve() -> (String, Arc<Bucket>) {
    let bucket = Arc::new(Bucket::default());
    let app = Router::new()
        .route("/meta/{*path}", get(get_document).put(put_document))
        .with_state(bucket.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/meta/", addr), bucket)
}

#[tokio::test]
async fn test_documents_round_trip_with_bearer_token() {
    let (base_url, bucket) = serve().await;
    let fetcher = HttpFetcher::new(&base_url, Environment::Production).token("secret");

    let registry = VersionRegistry::new(["1.0", "1.1"], ["1.0"]).unwrap();
    fetcher.set_version_registry(&registry).await.unwrap();
    assert_eq!(fetcher.get_version_registry().await.unwrap(), registry);

    let payload = r#"{"text":"hi"}"#;
    fetcher.set_item_json("Banner", payload, "1.0").await.unwrap();
    assert_eq!(fetcher.get_item_json("Banner", "1.0").await.unwrap(), payload);

    let mut manifest = Manifest::new();
    manifest.set_item("Banner", content_hash(payload));
    fetcher.set_manifest(&manifest, "1.0").await.unwrap();
    assert_eq!(fetcher.get_manifest("1.0").await.unwrap(), manifest);

    let documents = bucket.documents.lock().unwrap().clone();
    assert!(documents.contains_key("VersionRegistry.json"));
    assert!(documents.contains_key("1.0/Banner.json"));
    assert!(documents.contains_key("1.0/Manifest.json"));

    let auth = bucket.put_auth.lock().unwrap().clone();
    assert_eq!(auth.len(), 3);
    assert!(auth.iter().all(|a| a.as_deref() == Some("Bearer secret")));
}

#[tokio::test]
async fn test_writes_without_token_carry_no_authorization() {
    let (base_url, bucket) = serve().await;
    let fetcher = HttpFetcher::new(&base_url, Environment::Local);
    fetcher.set_item_json("Banner", "{}", "1.0").await.unwrap();
    assert_eq!(*bucket.put_auth.lock().unwrap(), vec![None::<String>]);
}

#[tokio::test]
async fn test_missing_document_is_fetcher_error() {
    let (base_url, _bucket) = serve().await;
    let fetcher = HttpFetcher::new(&base_url, Environment::Local);

    let err = fetcher.get_item_json("Missing", "1.0").await.unwrap_err();
    match err {
        MetadataError::FetcherIo { location, message } => {
            assert!(location.ends_with("/meta/1.0/Missing.json"), "{location}");
            assert!(message.contains("404"), "{message}");
        }
        other => panic!("expected FetcherIo, got {other:?}"),
    }
    assert!(matches!(
        fetcher.get_version_registry().await,
        Err(MetadataError::FetcherIo { .. })
    ));
}

#[tokio::test]
async fn test_reserved_keys_never_reach_the_server() {
    let (base_url, bucket) = serve().await;
    let fetcher = HttpFetcher::new(&base_url, Environment::Local);
    for key in ["Manifest", "a#b", "a?x"] {
        assert!(matches!(
            fetcher.set_item_json(key, "{}", "1.0").await,
            Err(MetadataError::InvalidKey(_))
        ));
    }
    assert!(bucket.documents.lock().unwrap().is_empty());
}
