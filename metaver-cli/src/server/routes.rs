use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use metaver_lib::MetadataScope;

use super::metrics::metrics;
use super::state::AppState;

fn unavailable() -> Response {
    (StatusCode::NOT_FOUND, "metadata unavailable").into_response()
}

fn parse_scope(raw: &str) -> Option<MetadataScope> {
    raw.parse().ok()
}

// ── GET /v1/{scope}/versions ─────────────────────────────────

pub async fn handle_versions(
    State(state): State<Arc<AppState>>,
    Path(scope): Path<String>,
) -> Response {
    let Some(scope) = parse_scope(&scope) else {
        return unavailable();
    };
    let snapshot = state.coordinator.read().await;
    let space = snapshot.space(scope);
    Json(serde_json::json!({
        "scope": scope,
        "generation": snapshot.generation(),
        "knownVersions": space.known_versions(),
        "currentVersions": space.current_versions(),
        "latestVersion": space.latest_version().map(|v| v.to_string()),
    }))
    .into_response()
}

// ── GET /v1/{scope}/versions/{version}/manifest ──────────────

pub async fn handle_manifest(
    State(state): State<Arc<AppState>>,
    Path((scope, version)): Path<(String, String)>,
) -> Response {
    let Some(scope) = parse_scope(&scope) else {
        return unavailable();
    };
    let snapshot = state.coordinator.read().await;
    match snapshot.space(scope).manifest(&version) {
        Ok(manifest) => Json(manifest).into_response(),
        Err(_) => unavailable(),
    }
}

// ── GET /v1/{scope}/versions/{version}/items/{key} ───────────

pub async fn handle_item(
    State(state): State<Arc<AppState>>,
    Path((scope, version, key)): Path<(String, String, String)>,
) -> Response {
    let Some(scope) = parse_scope(&scope) else {
        return unavailable();
    };
    let snapshot = state.coordinator.read().await;
    match snapshot.get_metadata_json(scope, &key, &version).await {
        Ok(json) => {
            metrics()
                .items_served
                .with_label_values(&[scope.as_str()])
                .inc();
            (StatusCode::OK, [("content-type", "application/json")], json).into_response()
        }
        Err(_) => unavailable(),
    }
}

// ── GET /v1/{scope}/versions/{version}/items/{key}/hash/{hash}

pub async fn handle_hash_check(
    State(state): State<Arc<AppState>>,
    Path((scope, version, key, hash)): Path<(String, String, String, String)>,
) -> Response {
    let Some(scope) = parse_scope(&scope) else {
        return unavailable();
    };
    let snapshot = state.coordinator.read().await;
    match snapshot.is_hash_current(scope, &key, &hash, &version) {
        Ok(current) => Json(serde_json::json!({ "current": current })).into_response(),
        Err(_) => unavailable(),
    }
}

#[cfg(test)]
mod tests {
    use metaver_lib::{
        CoordinatorBuilder, MemoryFetcher, MemoryTimestampStore, MetadataFetcher,
        StalenessTracker, VersionRegistry,
    };

    use super::*;

    async fn state() -> Arc<AppState> {
        let registry = VersionRegistry::new(["1.0", "1.1"], ["1.0"]).unwrap();
        let shared = Arc::new(MemoryFetcher::with_registry(&registry).await.unwrap());
        let app = Arc::new(MemoryFetcher::with_registry(&registry).await.unwrap());

        let mut manifest = metaver_lib::Manifest::new();
        manifest.set_item("Banner", metaver_lib::content_hash("{\"text\":\"hi\"}"));
        app.set_manifest(&manifest, "1.0").await.unwrap();
        app.set_item_json("Banner", "{\"text\":\"hi\"}", "1.0")
            .await
            .unwrap();

        let coordinator = CoordinatorBuilder::new()
            .app_name("shop")
            .shared_fetcher(shared)
            .app_fetcher(app)
            .build()
            .await
            .unwrap();
        Arc::new(AppState {
            coordinator: Arc::new(coordinator),
            tracker: Arc::new(StalenessTracker::new(
                Arc::new(MemoryTimestampStore::new()),
                "shop",
            )),
        })
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_item_served() {
        let response = handle_item(
            State(state().await),
            Path(("app".into(), "1.0".into(), "Banner".into())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "{\"text\":\"hi\"}");
    }

    #[tokio::test]
    async fn test_missing_item_is_generic_404() {
        let state = state().await;
        for (scope, version, key) in [
            ("app", "1.0", "Nope"),
            ("app", "9.0", "Banner"),
            ("global", "1.0", "Banner"),
        ] {
            let response = handle_item(
                State(state.clone()),
                Path((scope.into(), version.into(), key.into())),
            )
            .await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(body(response).await, "metadata unavailable");
        }
    }

    #[tokio::test]
    async fn test_hash_check() {
        let state = state().await;
        let hash = metaver_lib::content_hash("{\"text\":\"hi\"}");
        let response = handle_hash_check(
            State(state.clone()),
            Path(("app".into(), "1.0".into(), "Banner".into(), hash)),
        )
        .await;
        assert_eq!(body(response).await, r#"{"current":true}"#);

        let response = handle_hash_check(
            State(state),
            Path(("app".into(), "1.0".into(), "Banner".into(), "0000".into())),
        )
        .await;
        assert_eq!(body(response).await, r#"{"current":false}"#);
    }

    #[tokio::test]
    async fn test_versions() {
        let response = handle_versions(State(state().await), Path("app".into())).await;
        let value: serde_json::Value = serde_json::from_str(&body(response).await).unwrap();
        assert_eq!(value["knownVersions"], serde_json::json!(["1.0", "1.1"]));
        assert_eq!(value["currentVersions"], serde_json::json!(["1.0"]));
        assert_eq!(value["latestVersion"], "1.1");
        assert_eq!(value["scope"], "app");
    }
}
