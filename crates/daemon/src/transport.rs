//! Upload transport.
//!
//! The scheduler only needs "connect" and "send these bytes to this remote
//! path"; `HttpTransport` implements that as an authenticated HTTP PUT.

use crate::config::TransferConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while talking to the remote endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No transfer URL configured")]
    NotConfigured,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Remote rejected credentials ({0})")]
    Unauthorized(StatusCode),

    #[error("Remote returned {0}")]
    Status(StatusCode),
}

/// Moves file bytes to the remote endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Checks that the endpoint is reachable and accepts the credentials.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Sends `bytes` to `remote_path` (e.g. `/frame_001.fits`).
    async fn upload(&self, bytes: Vec<u8>, remote_path: &str) -> Result<(), TransportError>;
}

/// Normalises the configured URL: adds a scheme when missing, forces https
/// when TLS is requested, and drops a trailing slash.
pub fn endpoint_url(url: &str, use_tls: bool) -> String {
    let url = url.trim().trim_end_matches('/');
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));

    match rest {
        Some(rest) if use_tls => format!("https://{}", rest),
        Some(_) => url.to_string(),
        None if use_tls => format!("https://{}", url),
        None => format!("http://{}", url),
    }
}

/// HTTP PUT uploader with basic auth.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpTransport {
    pub fn from_config(config: &TransferConfig) -> Result<Self, TransportError> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(TransportError::NotConfigured)?;

        // The timeout bounds the connection handshake only, not the transfer.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: endpoint_url(url, config.use_tls),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(&self.password))
        }
    }
}

fn check_status(status: StatusCode) -> Result<(), TransportError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::Unauthorized(status)),
        s if s.is_client_error() || s.is_server_error() => Err(TransportError::Status(s)),
        _ => Ok(()),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let response = self.authed(self.client.head(&self.base_url)).send().await?;
        let status = response.status();
        debug!(url = %self.base_url, %status, "Transfer endpoint answered");

        // A bare endpoint may not answer HEAD; only credential failures count.
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::Unauthorized(status)),
            _ => {
                info!(url = %self.base_url, "Connected to transfer endpoint");
                Ok(())
            }
        }
    }

    async fn upload(&self, bytes: Vec<u8>, remote_path: &str) -> Result<(), TransportError> {
        let url = format!("{}{}", self.base_url, remote_path);
        let size = bytes.len();
        debug!(%url, size, "Upload started");

        let response = self.authed(self.client.put(&url)).body(bytes).send().await?;
        check_status(response.status())?;

        debug!(%url, size, "Upload finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{Path as UrlPath, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::put;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<HashMap<String, (Vec<u8>, Option<String>)>>>;

    async fn store(
        State(received): State<Received>,
        UrlPath(name): UrlPath<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> AxumStatus {
        if name == "forbidden.fits" {
            return AxumStatus::FORBIDDEN;
        }
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        received.lock().unwrap().insert(name, (body.to_vec(), auth));
        AxumStatus::CREATED
    }

    async fn spawn_server() -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route("/:name", put(store))
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), received)
    }

    fn config_for(url: &str) -> TransferConfig {
        TransferConfig {
            url: Some(url.to_string()),
            username: "observer".to_string(),
            password: "secret".to_string(),
            ..TransferConfig::default()
        }
    }

    #[test]
    fn test_endpoint_url_normalisation() {
        assert_eq!(endpoint_url("example.org/up/", false), "http://example.org/up");
        assert_eq!(endpoint_url("example.org", true), "https://example.org");
        assert_eq!(endpoint_url("http://example.org", true), "https://example.org");
        assert_eq!(endpoint_url("https://example.org", false), "https://example.org");
        assert_eq!(endpoint_url(" http://10.0.0.2:8080 ", false), "http://10.0.0.2:8080");
    }

    #[test]
    fn test_missing_url_is_not_configured() {
        assert!(matches!(
            HttpTransport::from_config(&TransferConfig::default()),
            Err(TransportError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_upload_puts_bytes_with_basic_auth() {
        let (url, received) = spawn_server().await;
        let transport = HttpTransport::from_config(&config_for(&url)).unwrap();

        transport.connect().await.unwrap();
        transport
            .upload(b"SIMPLE  =                    T".to_vec(), "/m31_001.fits")
            .await
            .unwrap();

        let received = received.lock().unwrap();
        let (body, auth) = received.get("m31_001.fits").expect("file should arrive");
        assert_eq!(body.as_slice(), b"SIMPLE  =                    T");
        assert!(auth.as_deref().unwrap_or_default().starts_with("Basic "));
    }

    #[tokio::test]
    async fn test_upload_reports_rejection() {
        let (url, _received) = spawn_server().await;
        let transport = HttpTransport::from_config(&config_for(&url)).unwrap();

        let result = transport.upload(vec![1, 2, 3], "/forbidden.fits").await;
        assert!(matches!(result, Err(TransportError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::from_config(&config_for(&format!("http://{}", addr))).unwrap();
        assert!(matches!(transport.connect().await, Err(TransportError::Request(_))));
    }
}
