//! Outbound HTTP call to a worker's `/file_parse` endpoint.
//!
//! The client's own timeout is set `EXTRA_TIMEOUT_BUFFER_SECS` beyond the
//! caller's deadline so the outer `tokio::time::timeout` the executor wraps
//! this in always fires first; the two timeout mechanisms must never race.

use crate::error::{Error, Result};
use base64::Engine;
use std::time::Duration;

/// Headroom added on top of the caller's deadline so the executor's own
/// `tokio::time::timeout` is always what expires, never this client.
const EXTRA_TIMEOUT_BUFFER_SECS: u64 = 10;

/// Thin HTTP client for one worker endpoint.
pub struct WorkerClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkerClient {
    /// `deadline` should equal the executor's `task_timeout`; the client's
    /// own timeout is padded beyond it per the module doc.
    pub fn new(base_url: &str, deadline: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(deadline + Duration::from_secs(EXTRA_TIMEOUT_BUFFER_SECS))
            .build()
            .expect("reqwest client builds with a static timeout");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Submit `payload` to `{base_url}/file_parse`.
    ///
    /// If `payload["backend"]` is `"auto"` or absent and `worker_backend` is
    /// set, the worker's backend is substituted in; every other field is
    /// forwarded verbatim. `file_base64`/`file_name` are decoded into the
    /// multipart file part and excluded from the form fields.
    pub async fn submit_task(
        &self,
        mut payload: serde_json::Value,
        worker_backend: Option<&str>,
    ) -> Result<serde_json::Value> {
        let obj = payload
            .as_object_mut()
            .ok_or_else(|| Error::Other("task payload must be a JSON object".to_string()))?;

        let needs_backend = match obj.get("backend").and_then(|v| v.as_str()) {
            Some("auto") | None => true,
            Some(_) => false,
        };
        if needs_backend {
            if let Some(backend) = worker_backend {
                obj.insert("backend".to_string(), serde_json::Value::String(backend.to_string()));
            }
        }

        let file_base64 = obj
            .remove("file_base64")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let file_name = obj
            .remove("file_name")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "document.pdf".to_string());
        let file_bytes = base64::engine::general_purpose::STANDARD
            .decode(file_base64.as_bytes())
            .map_err(|e| Error::Other(format!("invalid file_base64: {e}")))?;

        let mut form = reqwest::multipart::Form::new().part(
            "files",
            reqwest::multipart::Part::bytes(file_bytes)
                .file_name(file_name)
                .mime_str("application/pdf")
                .map_err(|e| Error::Other(e.to_string()))?,
        );
        for (key, value) in obj.iter() {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            form = form.text(key.clone(), text);
        }

        let response = self
            .http
            .post(format!("{}/file_parse", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteError(format!("{status}: {body}")));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let c = WorkerClient::new("http://host:1234/", Duration::from_secs(5));
        assert_eq!(c.base_url, "http://host:1234");
    }

    #[tokio::test]
    async fn submit_requires_object_payload() {
        let c = WorkerClient::new("http://127.0.0.1:1", Duration::from_secs(1));
        let err = c.submit_task(serde_json::json!([1, 2, 3]), None).await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
