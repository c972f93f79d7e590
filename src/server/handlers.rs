//! Route handlers and the per-route panic guards.

use axum::extract::State;
use axum::handler::Handler;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, MethodRouter};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, error};

use super::AppState;
use crate::backup::BackupResult;

const STORE_PANIC_MESSAGE: &str = "Internal error while storing files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Running,
    Error,
}

/// Liveness of this process, serialized as `{"Status": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceState {
    pub status: ServiceStatus,
}

impl ServiceState {
    pub fn running() -> Self {
        Self {
            status: ServiceStatus::Running,
        }
    }

    pub fn error() -> Self {
        Self {
            status: ServiceStatus::Error,
        }
    }
}

/// Failures of the `/store` handler itself, as opposed to a failed backup.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("backup task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        error!("store handler failed: {}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(BackupResult::error(self.to_string())),
        )
            .into_response()
    }
}

/// `GET /`
pub async fn get_state() -> Json<ServiceState> {
    Json(ServiceState::running())
}

/// `POST /store`
///
/// Always 200 once the backup ran; callers read `Status` from the body.
pub async fn store(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackupResult>, HandlerError> {
    let guard = state.store_lock.clone().lock_owned().await;
    let request = state.request.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        request.run()
    })
    .await?;

    if let Ok(body) = serde_json::to_string(&result) {
        debug!("Response body: {}", body);
    }
    Ok(Json(result))
}

fn panic_detail(err: &(dyn Any + Send)) -> &str {
    if let Some(s) = err.downcast_ref::<String>() {
        s
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    }
}

fn state_panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    error!("state handler panicked: {}", panic_detail(err.as_ref()));
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ServiceState::error())).into_response()
}

fn store_panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    error!("store handler panicked: {}", panic_detail(err.as_ref()));
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(BackupResult::error(STORE_PANIC_MESSAGE)),
    )
        .into_response()
}

/// `GET` route whose panics become `500 {"Status":"Error"}`.
pub(crate) fn liveness_route<H, T>(handler: H) -> MethodRouter<Arc<AppState>>
where
    H: Handler<T, Arc<AppState>>,
    T: 'static,
{
    get(handler).layer(CatchPanicLayer::custom(state_panic_response))
}

/// `POST` route whose panics become `500 {"Status":"Error","Message":..}`.
pub(crate) fn store_route<H, T>(handler: H) -> MethodRouter<Arc<AppState>>
where
    H: Handler<T, Arc<AppState>>,
    T: 'static,
{
    post(handler).layer(CatchPanicLayer::custom(store_panic_response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupRequest, BackupStatus};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::Router;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(routes: Router<Arc<AppState>>) -> Router {
        let request = BackupRequest::new("/nonexistent", "/nonexistent");
        routes.with_state(Arc::new(AppState::new(request)))
    }

    async fn panicking_state() -> Json<ServiceState> {
        panic!("forced state failure")
    }

    async fn panicking_store() -> Json<BackupResult> {
        panic!("forced store failure")
    }

    #[tokio::test]
    async fn test_state_panic_degrades_to_500() {
        let app = app(Router::new().route("/", liveness_route(panicking_state)));

        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let state: ServiceState = serde_json::from_slice(&body).unwrap();
        assert_eq!(state, ServiceState::error());
    }

    #[tokio::test]
    async fn test_store_panic_degrades_to_500() {
        let app = app(Router::new().route("/store", store_route(panicking_store)));

        let resp = app
            .oneshot(Request::post("/store").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let result: BackupResult = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.status, BackupStatus::Error);
    }

    #[tokio::test]
    async fn test_abandoned_store_keeps_lock_until_copy_finishes() {
        const FILES: usize = 32;
        let temp = tempfile::TempDir::new().unwrap();
        let source = temp.path().join("src");
        let destination = temp.path().join("dst");
        std::fs::create_dir(&source).unwrap();
        let chunk = vec![7u8; 1024 * 1024];
        for i in 0..FILES {
            std::fs::write(source.join(format!("log.{i}")), &chunk).unwrap();
        }
        let state = Arc::new(AppState::new(BackupRequest::new(&source, &destination)));

        // The caller gives up almost immediately, dropping the handler future.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(1), store(State(state.clone()))).await;

        if abandoned.is_err() {
            let copied = || std::fs::read_dir(&destination).map(|d| d.count()).unwrap_or(0);
            let lock_free = state.store_lock.try_lock().is_ok();
            assert!(!lock_free || copied() == FILES, "lock released mid-copy");

            let _wait = state.store_lock.lock().await;
            assert_eq!(copied(), FILES);
        }
    }

    #[test]
    fn test_service_state_serialization() {
        assert_eq!(
            serde_json::to_string(&ServiceState::running()).unwrap(),
            r#"{"Status":"Running"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServiceState::error()).unwrap(),
            r#"{"Status":"Error"}"#
        );
    }

    #[test]
    fn test_panic_detail_extracts_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_detail(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_detail(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_detail(boxed.as_ref()), "unknown panic");
    }
}
