//! HTTP Router
//!
//! Record endpoints plus every activated plugin's routes under its prefix.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handler::{create_plugin, delete_plugin, get_plugin, list_plugins, update_plugin};
use super::state::AppState;

/// Create the application router; `plugins` is merged in as-is
pub fn create_router(state: AppState, plugins: Router) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/plugins", get(list_plugins).post(create_plugin))
        .route(
            "/plugins/:id",
            get(get_plugin).put(update_plugin).delete(delete_plugin),
        )
        .with_state(state)
        .merge(plugins)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    plugins: Vec<String>,
    started_at: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        plugins: state.registry().names(),
        started_at: state.started_at().to_rfc3339(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::environment::testing::{Scripted, service_config};
    use crate::environment::{ConflictProbe, EnvironmentBuilder, Resolver};
    use crate::lifecycle::{OperationLock, PluginLifecycle};
    use crate::plugin::ServicePluginRegistry;
    use crate::store::MemoryStore;

    struct Fixture {
        _service: TempDir,
        lock: Arc<OperationLock>,
        app: Router,
    }

    fn fixture(resolver: Scripted) -> Fixture {
        let service = TempDir::new().unwrap();
        let config = service_config(service.path());
        let resolver: Arc<dyn Resolver> = Arc::new(resolver);
        let lock = Arc::new(OperationLock::new(Duration::from_millis(100)));
        let lifecycle = Arc::new(PluginLifecycle::new(
            Arc::new(MemoryStore::new()),
            ConflictProbe::new(&config, resolver.clone()),
            EnvironmentBuilder::new(&config, resolver),
            lock.clone(),
        ));
        let state = AppState::new(
            lifecycle,
            Arc::new(ServicePluginRegistry::new()),
            Duration::from_secs(3),
        );
        Fixture {
            _service: service,
            lock,
            app: create_router(state, Router::new()),
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn weather(version: &str) -> Value {
        json!({
            "name": "Weather",
            "source": "acme-weather",
            "source_type": "registry",
            "version": version,
        })
    }

    #[tokio::test]
    async fn test_health() {
        let fx = fixture(Scripted::accept_all());
        let (status, body) = send(&fx.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_crud_flow() {
        let fx = fixture(Scripted::accept_all());

        let (status, created) = send(&fx.app, "POST", "/plugins", Some(weather("1.0.0"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, listed) = send(&fx.app, "GET", "/plugins", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, updated) = send(
            &fx.app,
            "PUT",
            &format!("/plugins/{id}"),
            Some(json!({ "version": "1.1.0" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["updated_version"], "1.1.0");

        let (status, _) = send(&fx.app, "DELETE", &format!("/plugins/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&fx.app, "GET", &format!("/plugins/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["id"], id.as_str());
    }

    #[tokio::test]
    async fn test_conflict_is_409() {
        let fx = fixture(Scripted::reject_containing("acme-weather==9", "no solution found"));
        let (status, body) = send(&fx.app, "POST", "/plugins", Some(weather("9.0.0"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["diagnostic"], "no solution found");
    }

    #[tokio::test]
    async fn test_contention_is_503_with_retry_after() {
        let fx = fixture(Scripted::accept_all());
        let _held = fx.lock.acquire("build").await.unwrap();

        let response = fx
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/plugins")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(weather("1.0.0").to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }
}
