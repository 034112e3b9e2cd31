//! Client for the generation and storage backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}")]
    Status { endpoint: String, status: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Prompt {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: Prompt,
    pub format: String,
    pub looping: bool,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            prompt: Prompt { text: text.into() },
            format: "mp3".to_string(),
            looping: false,
        }
    }
}

/// A status report for a generation task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskReport {
    pub status: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl TaskReport {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            details: serde_json::Map::new(),
        }
    }
}

/// Ids come back as strings or numbers depending on the endpoint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteId {
    Text(String),
    Number(i64),
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        match id {
            RemoteId::Text(text) => text,
            RemoteId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TaskCreated {
    task_id: RemoteId,
}

#[derive(Deserialize)]
struct DerivedTrack {
    track_id: RemoteId,
}

#[derive(Deserialize)]
struct DownloadLink {
    url: String,
}

/// What a track download answered with.
#[derive(Debug, PartialEq)]
pub enum DownloadBody {
    Audio(Vec<u8>),
    /// A JSON `{url}` pointing at the actual audio.
    Link(String),
}

/// Tell raw audio from a JSON link by content type, falling back to sniffing
/// for a JSON object.
pub fn classify_download(content_type: Option<&str>, body: Vec<u8>) -> DownloadBody {
    let declared_json = content_type.is_some_and(|ct| ct.starts_with("application/json"));
    let looks_json = body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');
    if declared_json || looks_json {
        if let Ok(link) = serde_json::from_slice::<DownloadLink>(&body) {
            return DownloadBody::Link(link.url);
        }
    }
    DownloadBody::Audio(body)
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, http))
    }

    /// Talk to `base_url` through an already configured HTTP client.
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Returns the task id to poll.
    pub async fn start_generation(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let endpoint = "start_track_generation";
        let created: TaskCreated = self
            .send(endpoint, self.http.post(self.url(endpoint)).json(request))
            .await?
            .json()
            .await?;
        Ok(created.task_id.into())
    }

    pub async fn generation_status(&self, task_id: &str) -> Result<TaskReport, BackendError> {
        let endpoint = "get_generated_track";
        let report = self
            .send(
                endpoint,
                self.http
                    .get(self.url(endpoint))
                    .query(&[("task_id", task_id)]),
            )
            .await?
            .json()
            .await?;
        Ok(report)
    }

    /// Store audio on the backend. Returns the backend's confirmation.
    pub async fn upload_audio(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<serde_json::Value, BackendError> {
        let endpoint = "upload-audio";
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let confirmation = self
            .send(endpoint, self.http.post(self.url(endpoint)).multipart(form))
            .await?
            .json()
            .await?;
        tracing::info!(file = file_name, "uploaded audio");
        Ok(confirmation)
    }

    /// Fetch a stored track's audio, following a JSON link if that is what the
    /// backend hands out.
    pub async fn download_track(&self, track_id: &str) -> Result<Vec<u8>, BackendError> {
        let endpoint = format!("tracks/{track_id}/download");
        let response = self.send(&endpoint, self.http.get(self.url(&endpoint))).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        match classify_download(content_type.as_deref(), body) {
            DownloadBody::Audio(bytes) => Ok(bytes),
            DownloadBody::Link(url) => {
                tracing::debug!(track = track_id, %url, "following download link");
                let bytes = self.send(&endpoint, self.http.get(&url)).await?.bytes().await?;
                if bytes.is_empty() {
                    return Err(BackendError::InvalidResponse {
                        endpoint,
                        message: "download link returned no audio".to_string(),
                    });
                }
                Ok(bytes.to_vec())
            }
        }
    }

    /// Ask for a tempo-changed copy of a stored track. Returns the new track's
    /// id; the original is left as is.
    pub async fn adjust_speed(&self, track_id: &str, speed_factor: f64) -> Result<String, BackendError> {
        let endpoint = "process/speed";
        let derived: DerivedTrack = self
            .send(
                endpoint,
                self.http.post(self.url(endpoint)).json(&serde_json::json!({
                    "track_id": track_id,
                    "speed_factor": speed_factor,
                })),
            )
            .await?
            .json()
            .await?;
        Ok(derived.track_id.into())
    }
}
