//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server needed.

use atomera_api::error::AppError;
use atomera_core::error::CoreError;
use atomera_engine::EngineError;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;

async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "Job",
        id: "0190c3a2-0000-7000-8000-000000000000".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(
        json["error"],
        "Job with id 0190c3a2-0000-7000-8000-000000000000 not found"
    );
}

#[tokio::test]
async fn validation_error_returns_400() {
    let (status, json) = error_to_response(CoreError::Validation("bad smiles".into()).into()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "bad smiles");
}

#[tokio::test]
async fn state_conflicts_return_409() {
    let (status, json) =
        error_to_response(CoreError::InvalidTransition("job is completed".into()).into()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "INVALID_TRANSITION");

    let (status, json) = error_to_response(CoreError::NotReady("job is running".into()).into()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "NOT_READY");
}

#[tokio::test]
async fn failed_job_returns_422_with_its_message() {
    let err: AppError = EngineError::JobFailed("timeout: no result after 1800s".into()).into();

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "JOB_FAILED");
    assert_eq!(json["error"], "timeout: no result after 1800s");
}

#[tokio::test]
async fn internal_errors_are_sanitized() {
    let (status, json) =
        error_to_response(AppError::InternalError("disk full at /var/lib/atomera".into())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");

    let (status, _) = error_to_response(CoreError::Internal("boom".into()).into()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
