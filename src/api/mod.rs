//! HTTP surface over the query engine.
//!
//! Four endpoints mirror the boundary operations: batch query, stored
//! movements, statistics and forced cleanup. The batch endpoint always
//! answers `200` — per-item failures travel inside the body, the transport
//! only fails when the transport itself is broken.

use crate::models::{BatchResult, Movement};
use crate::services::{CleanupReport, MovementQueryService, SystemStatistics};
use crate::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Body of `POST /tribunal/movements/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// The process numbers to query, loosely formatted.
    #[serde(alias = "processNumbers")]
    pub process_numbers: Vec<String>,
}

/// Builds the application router.
#[must_use]
pub fn router(service: MovementQueryService) -> Router {
    Router::new()
        .route("/tribunal/movements/batch", post(batch))
        .route("/tribunal/movements/{process_number}", get(movements))
        .route("/tribunal/statistics", get(statistics))
        .route("/tribunal/cleanup", post(cleanup))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

async fn batch(
    State(service): State<MovementQueryService>,
    Json(request): Json<BatchRequest>,
) -> Json<BatchResult> {
    Json(service.query_batch(&request.process_numbers).await)
}

async fn movements(
    State(service): State<MovementQueryService>,
    Path(process_number): Path<String>,
) -> std::result::Result<Json<Vec<Movement>>, ApiError> {
    Ok(Json(service.stored_movements(&process_number)?))
}

async fn statistics(
    State(service): State<MovementQueryService>,
) -> std::result::Result<Json<SystemStatistics>, ApiError> {
    Ok(Json(service.statistics()?))
}

async fn cleanup(
    State(service): State<MovementQueryService>,
) -> std::result::Result<Json<CleanupReport>, ApiError> {
    Ok(Json(service.run_cleanup()?))
}

/// Transport-level error rendering.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            Error::InvalidCaseNumber(_) | Error::UnknownTribunal { .. } => StatusCode::BAD_REQUEST,
            Error::QueueTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Fetch { .. } => StatusCode::BAD_GATEWAY,
            Error::Storage { .. } | Error::QueueCleared { .. } | Error::SchedulerClosed => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MovementFetcher, RawMovement};
    use crate::models::TribunalId;
    use crate::storage::SqliteStore;
    use crate::Result;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct StaticFetcher;

    #[async_trait]
    impl MovementFetcher for StaticFetcher {
        async fn fetch_movements(
            &self,
            _process_number: &str,
            _tribunal: &TribunalId,
        ) -> Result<Vec<RawMovement>> {
            Ok(vec![RawMovement {
                date: NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
                code: None,
                title: "Sentença proferida".to_string(),
                description: String::new(),
                official: true,
                metadata: serde_json::Value::Null,
            }])
        }
    }

    fn app() -> Router {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let service =
            MovementQueryService::builder(Arc::new(StaticFetcher) as Arc<dyn MovementFetcher>, store)
                .build();
        router(service)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_batch_encodes_per_item_failures_with_200() {
        let request = Request::builder()
            .method("POST")
            .uri("/tribunal/movements/batch")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"processNumbers": ["0001234-56.2024.5.02.0001", "garbage"]}"#,
            ))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
        assert_eq!(body["results"][0]["success"], true);
        assert_eq!(body["results"][1]["success"], false);
        assert_eq!(body["summary"]["failed"], 1);
    }

    #[tokio::test]
    async fn test_movements_rejects_malformed_number() {
        let request = Request::builder()
            .uri("/tribunal/movements/garbage")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("invalid case number"));
    }

    #[tokio::test]
    async fn test_movements_empty_for_unseen_process() {
        let request = Request::builder()
            .uri("/tribunal/movements/0001234-56.2024.5.02.0001")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_statistics_and_cleanup_roundtrip() {
        let app = app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/tribunal/statistics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats = body_json(response).await;
        assert_eq!(stats["novelties"]["total"], 0);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tribunal/cleanup")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["expired_novelties"], 0);
    }
}
