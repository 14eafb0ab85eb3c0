#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atomera_api::config::ServerConfig;
use atomera_api::router::build_app_router;
use atomera_api::state::AppState;
use atomera_db::models::status::BackendKind;
use atomera_db::MemoryJobStore;
use atomera_engine::backend::{
    BackendOutput, ExecutionBackend, ExecutionContext, ExecutionError, FileKind, OutputFile,
};
use atomera_engine::JobOrchestrator;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::Semaphore;
use tower::ServiceExt;

/// Backend double for API tests.
///
/// Succeeds with one pose file and a confidence JSON unless `failure` is
/// set. With a `gate`, each run waits for one permit (or cancellation).
pub struct StubBackend {
    pub failure: Option<&'static str>,
    pub gate: Option<Arc<Semaphore>>,
}

impl StubBackend {
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            gate: None,
        }
    }

    pub fn failing(message: &'static str) -> Self {
        Self {
            failure: Some(message),
            gate: None,
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            failure: None,
            gate: Some(gate),
        }
    }
}

#[async_trait]
impl ExecutionBackend for StubBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<BackendOutput, ExecutionError> {
        ctx.report_percent(50);
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ExecutionError::Cancelled),
                permit = gate.acquire() => permit.expect("gate").forget(),
            }
        }
        if let Some(message) = self.failure {
            return Err(ExecutionError::LocalFailed(message.into()));
        }
        Ok(BackendOutput {
            affinity_pred_value: Some(-7.25),
            affinity_probability_binary: Some(0.81),
            confidence_score: Some(0.88),
            files: vec![
                OutputFile {
                    name: "pose_model_0.cif".into(),
                    kind: FileKind::Pose,
                    data: b"data_pose\n".to_vec(),
                },
                OutputFile {
                    name: "confidence.json".into(),
                    kind: FileKind::Auxiliary,
                    data: br#"{"confidence_score": 0.88}"#.to_vec(),
                },
            ],
            ..Default::default()
        })
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        job_retention_hours: 24,
    }
}

/// Build the full application router around an in-memory job store and the
/// given backend. Returns the orchestrator too, for direct inspection.
pub fn build_test_app(backend: StubBackend) -> (Router, JobOrchestrator) {
    let config = test_config();
    let orchestrator = JobOrchestrator::new(Arc::new(MemoryJobStore::new()), Arc::new(backend), 4);
    let state = AppState {
        orchestrator: orchestrator.clone(),
        config: Arc::new(config.clone()),
    };
    (build_app_router(state, &config), orchestrator)
}

/// A request body that passes validation.
pub fn valid_request() -> serde_json::Value {
    serde_json::json!({
        "protein": {"sequence": "mktayiakqr"},
        "ligand": {"smiles": "CC(=O)Oc1ccccc1C(=O)O"},
        "use_msa": false,
    })
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response")
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri, None).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

/// Submit a valid request and return the new job id.
pub async fn submit(app: &Router) -> String {
    let response = post_json(app, "/api/v1/jobs", valid_request()).await;
    assert_eq!(response.status(), axum::http::StatusCode::ACCEPTED);
    let json = body_json(response).await;
    json["data"]["job_id"].as_str().expect("job_id").to_string()
}

/// Poll `GET /api/v1/jobs/{id}` until the job reaches `status`.
pub async fn wait_for_status(app: &Router, id: &str, status: &str) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let json = body_json(get(app, &format!("/api/v1/jobs/{id}")).await).await;
            if json["data"]["status"] == status {
                return json["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach the expected status in time")
}
