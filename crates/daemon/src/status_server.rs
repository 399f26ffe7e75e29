//! Status HTTP server.
//!
//! Exposes the session status and the frame list as JSON for dashboards
//! and monitoring tools.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

use crate::frame::Frame;
use crate::status::{FeatureFlags, SharedStatus};
use crate::summary::SessionSummary;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address {0:?}")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Body of GET /status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub timestamp_unix_ms: i64,
    pub session_name: Option<String>,
    pub directory_path: Option<String>,
    pub features: FeatureFlags,
    pub upload_window: (String, String),
    pub summary: SessionSummary,
}

/// Handler for GET /status
async fn get_status(State(status): State<SharedStatus>) -> Json<StatusResponse> {
    let snapshot = status.read().await;
    Json(StatusResponse {
        timestamp_unix_ms: snapshot.timestamp_unix_ms,
        session_name: snapshot.session_name.clone(),
        directory_path: snapshot.directory_path.clone(),
        features: snapshot.features,
        upload_window: snapshot.upload_window.clone(),
        summary: snapshot.summary.clone(),
    })
}

/// Handler for GET /frames
async fn get_frames(State(status): State<SharedStatus>) -> Json<Vec<Frame>> {
    Json(status.read().await.frames.clone())
}

/// Creates the axum Router with the status endpoints
pub fn create_status_router(status: SharedStatus) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/frames", get(get_frames))
        .with_state(status)
}

/// Runs the status HTTP server on `bind` (e.g. `127.0.0.1:7979`)
pub async fn run_status_server(status: SharedStatus, bind: &str) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;
    let app = create_status_router(status);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameStatus;
    use crate::status::new_shared_status;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn body_of(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_get_status_returns_json() {
        let status = new_shared_status();
        {
            let mut snapshot = status.write().await;
            snapshot.timestamp_unix_ms = 1701388800000;
            snapshot.session_name = Some("m31".to_string());
            snapshot.features.scanning = true;
            snapshot.summary.count = 3;
            snapshot.summary.approved = 2;
            snapshot.upload_window = ("8:00PM".to_string(), "Time not set".to_string());
        }

        let (code, body) = body_of(create_status_router(status), "/status").await;
        assert_eq!(code, StatusCode::OK);

        let response: StatusResponse =
            serde_json::from_slice(&body).expect("should deserialize to StatusResponse");
        assert_eq!(response.timestamp_unix_ms, 1701388800000);
        assert_eq!(response.session_name.as_deref(), Some("m31"));
        assert!(response.features.scanning);
        assert!(!response.features.transfer);
        assert_eq!(response.summary.count, 3);
        assert_eq!(response.upload_window.0, "8:00PM");
    }

    #[tokio::test]
    async fn test_get_frames_returns_registry() {
        let status = new_shared_status();
        {
            let mut frame = Frame::discovered("a.fits", "/data", 42, Utc::now());
            frame.status = FrameStatus::Copied;
            status.write().await.frames.push(frame);
        }

        let (code, body) = body_of(create_status_router(status), "/frames").await;
        assert_eq!(code, StatusCode::OK);

        let frames: Vec<Frame> = serde_json::from_slice(&body).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].name, "a.fits");
        assert_eq!(frames[0].status, FrameStatus::Copied);
    }

    #[tokio::test]
    async fn test_empty_status() {
        let (code, body) = body_of(create_status_router(new_shared_status()), "/status").await;
        assert_eq!(code, StatusCode::OK);

        let json = String::from_utf8(body).unwrap();
        assert!(json.contains("\"summary\""));
        assert!(json.contains("\"features\""));
        assert!(json.contains("\"by_status\""));
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let result = run_status_server(new_shared_status(), "not-an-address").await;
        assert!(matches!(result, Err(ServerError::InvalidAddress(_))));
    }
}
