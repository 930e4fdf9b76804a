//! HTTP client for the remote provider.
//!
//! All requests carry `Authorization: Bearer`, `Accept: application/json`,
//! and a stable `User-Agent`. Transport and status errors are mapped into the
//! pipeline taxonomy with credential-sanitised messages.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::api::types::{
    ApiResponse, FileObject, ResponsesRequest, VectorStoreObject,
};
use crate::error::{ApiErrorKind, OxError, Result};
use crate::sanitize::redact_secrets;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const USER_AGENT: &str = concat!("oxstruct/", env!("CARGO_PKG_VERSION"));

/// Request timeout ceiling (5 minutes).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-request ceiling for container-file downloads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Hard ceiling for container-file downloads (100 MiB).
pub const MAX_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    download_http: Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        let download_http = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(DOWNLOAD_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            download_http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
    }

    /// `POST /responses`.
    pub async fn create_response(&self, request: &ResponsesRequest) -> Result<ApiResponse> {
        debug!(model = %request.model, tools = request.tools.len(), strict = request.text.is_some(), "sending responses request");
        let response = self
            .auth(self.http.post(self.url("/responses")))
            .json(request)
            .send()
            .await
            .map_err(network_error)?;
        self.parse_json(response).await
    }

    /// `POST /files` multipart upload with `purpose=assistants`.
    pub async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<FileObject> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let response = self
            .auth(self.http.post(self.url("/files")))
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;
        self.parse_json(response).await
    }

    /// `DELETE /files/{id}`.
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        let response = self
            .auth(self.http.delete(self.url(&format!("/files/{file_id}"))))
            .send()
            .await
            .map_err(network_error)?;
        self.expect_ok(response).await
    }

    /// `GET /files/{id}/content`.
    pub async fn file_content(&self, file_id: &str) -> Result<Vec<u8>> {
        let response = self
            .auth(self.http.get(self.url(&format!("/files/{file_id}/content"))))
            .send()
            .await
            .map_err(network_error)?;
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        Ok(response.bytes().await.map_err(network_error)?.to_vec())
    }

    /// `POST /vector_stores` with an inactivity TTL.
    pub async fn create_vector_store(&self, name: &str, ttl_days: u32) -> Result<VectorStoreObject> {
        let body = serde_json::json!({
            "name": name,
            "expires_after": {"anchor": "last_active_at", "days": ttl_days},
        });
        let response = self
            .auth(self.http.post(self.url("/vector_stores")))
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        self.parse_json(response).await
    }

    /// `GET /vector_stores/{id}`.
    pub async fn retrieve_vector_store(&self, store_id: &str) -> Result<VectorStoreObject> {
        let response = self
            .auth(self.http.get(self.url(&format!("/vector_stores/{store_id}"))))
            .send()
            .await
            .map_err(network_error)?;
        self.parse_json(response).await
    }

    /// `POST /vector_stores/{id}/file_batches`.
    pub async fn attach_file_batch(&self, store_id: &str, file_ids: &[String]) -> Result<()> {
        let body = serde_json::json!({"file_ids": file_ids});
        let response = self
            .auth(
                self.http
                    .post(self.url(&format!("/vector_stores/{store_id}/file_batches"))),
            )
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        self.expect_ok(response).await
    }

    /// `DELETE /vector_stores/{id}`.
    pub async fn delete_vector_store(&self, store_id: &str) -> Result<()> {
        let response = self
            .auth(
                self.http
                    .delete(self.url(&format!("/vector_stores/{store_id}"))),
            )
            .send()
            .await
            .map_err(network_error)?;
        self.expect_ok(response).await
    }

    /// Direct authenticated GET of a container file, with a HEAD pre-flight
    /// enforcing the download ceiling. 404 means the container (or the file
    /// inside it) is gone; containers expire after roughly 20 minutes.
    pub async fn download_container_file(
        &self,
        container_id: &str,
        file_id: &str,
    ) -> Result<Vec<u8>> {
        let url = self.url(&format!("/containers/{container_id}/files/{file_id}/content"));

        let head = self
            .auth(self.download_http.head(&url))
            .send()
            .await
            .map_err(network_error)?;
        if head.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(OxError::RateLimited(file_id.to_string()));
        }
        if let Some(length) = head
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            if length > MAX_DOWNLOAD_BYTES {
                return Err(OxError::DownloadFailed(format!(
                    "file {file_id} is {length} bytes (max {MAX_DOWNLOAD_BYTES})"
                )));
            }
        }

        let response = self
            .auth(self.download_http.get(&url))
            .send()
            .await
            .map_err(network_error)?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(OxError::ContainerExpired {
                container_id: container_id.to_string(),
                file_id: file_id.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(OxError::RateLimited(file_id.to_string())),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(OxError::DownloadFailed(redact_secrets(format!(
                    "download failed: {status} - {body}"
                ))))
            }
            _ => Ok(response.bytes().await.map_err(network_error)?.to_vec()),
        }
    }

    async fn parse_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| OxError::Internal(anyhow::anyhow!("malformed API response: {e}")))
    }

    async fn expect_ok(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        Ok(())
    }

    async fn status_error(&self, response: reqwest::Response) -> OxError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = extract_api_message(&body).unwrap_or_else(|| body.clone());
        classify_status(status, message)
    }
}

/// Pull `error.message` out of a provider error body when present.
fn extract_api_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

fn classify_status(status: StatusCode, message: String) -> OxError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiErrorKind::Authentication,
        StatusCode::TOO_MANY_REQUESTS => ApiErrorKind::RateLimit,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            if message.to_ascii_lowercase().contains("context length")
                || message.to_ascii_lowercase().contains("maximum context")
            {
                ApiErrorKind::ContextLength
            } else {
                ApiErrorKind::InvalidRequest
            }
        }
        status if status.is_server_error() => ApiErrorKind::Server,
        _ => ApiErrorKind::InvalidRequest,
    };
    OxError::Api {
        kind,
        message: redact_secrets(message),
        status: Some(status.as_u16()),
    }
}

fn network_error(err: reqwest::Error) -> OxError {
    OxError::Api {
        kind: ApiErrorKind::Network,
        message: redact_secrets(err.to_string()),
        status: err.status().map(|s| s.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        let err = classify_status(StatusCode::UNAUTHORIZED, "bad key".into());
        assert!(matches!(
            err,
            OxError::Api { kind: ApiErrorKind::Authentication, .. }
        ));
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, OxError::Api { kind: ApiErrorKind::RateLimit, .. }));
        let err = classify_status(
            StatusCode::BAD_REQUEST,
            "This model's maximum context length is 128000 tokens".into(),
        );
        assert!(matches!(
            err,
            OxError::Api { kind: ApiErrorKind::ContextLength, .. }
        ));
        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "oops".into());
        assert!(matches!(err, OxError::Api { kind: ApiErrorKind::Server, .. }));
    }

    #[test]
    fn extracts_provider_error_message() {
        let body = r#"{"error": {"message": "Invalid extension .yaml. Supported formats: ...", "type": "invalid_request_error"}}"#;
        assert_eq!(
            extract_api_message(body).unwrap(),
            "Invalid extension .yaml. Supported formats: ..."
        );
        assert_eq!(extract_api_message("not json"), None);
    }

    #[test]
    fn error_messages_are_sanitised() {
        let err = classify_status(
            StatusCode::UNAUTHORIZED,
            "key sk-abcdefghijklmnopqrstuvwx rejected".into(),
        );
        match err {
            OxError::Api { message, .. } => assert!(!message.contains("sk-abcdefghijklmnopq")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
