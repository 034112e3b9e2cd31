use std::future::Future;
use std::time::Duration;

use crate::backend::{BackendClient, BackendError, GenerationRequest, TaskReport};

/// Where a track generation stands, as shown to the user.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum GenerationStatus {
    #[default]
    Idle,
    Starting,
    InProgress {
        attempt: u32,
        max: u32,
    },
    Completed,
    Failed(String),
    TimedOut,
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationStatus::Idle => Ok(()),
            GenerationStatus::Starting => write!(f, "Starting track generation..."),
            GenerationStatus::InProgress { attempt, max } => {
                write!(f, "Track generation in progress... ({attempt}/{max})")
            }
            GenerationStatus::Completed => write!(f, "Track generation completed!"),
            GenerationStatus::Failed(message) => write!(f, "{message}"),
            GenerationStatus::TimedOut => {
                write!(f, "Track generation timed out. Please try again.")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("failed to start track generation: {0}")]
    Start(#[source] BackendError),

    #[error("Unexpected status: {0}")]
    UnexpectedStatus(String),

    #[error("failed to check track status after {attempts} attempts: {last_error}")]
    Unreachable { attempts: u32, last_error: String },

    #[error("track generation timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },
}

impl GenerationError {
    /// The terminal status this error leaves the generation in.
    pub fn status(&self) -> GenerationStatus {
        match self {
            GenerationError::TimedOut { .. } => GenerationStatus::TimedOut,
            GenerationError::UnexpectedStatus(status) => {
                GenerationStatus::Failed(format!("Unexpected status: {status}"))
            }
            other => GenerationStatus::Failed(other.to_string()),
        }
    }
}

/// Poll a generation task until it is composed.
///
/// The first check happens right away, later ones `policy.interval` apart, at
/// most `policy.max_attempts` in total. `running` and `composing` keep polling;
/// any other status ends it. A failed check is retried within the same
/// attempt budget.
pub async fn poll_generation<F, Fut>(
    policy: PollPolicy,
    mut fetch: F,
    mut on_status: impl FnMut(GenerationStatus),
) -> Result<TaskReport, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TaskReport, BackendError>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match fetch().await {
            Ok(report) => match report.status.as_str() {
                "composed" => {
                    tracing::info!(attempt, "track generation completed");
                    on_status(GenerationStatus::Completed);
                    return Ok(report);
                }
                "running" | "composing" => {
                    tracing::info!(attempt, max, status = %report.status, "track generation in progress");
                    on_status(GenerationStatus::InProgress { attempt, max });
                    if attempt >= max {
                        tracing::error!(attempts = attempt, "track generation timed out");
                        let err = GenerationError::TimedOut { attempts: attempt };
                        on_status(err.status());
                        return Err(err);
                    }
                }
                other => {
                    tracing::error!(status = other, "unexpected track generation status");
                    let err = GenerationError::UnexpectedStatus(other.to_string());
                    on_status(err.status());
                    return Err(err);
                }
            },
            Err(err) => {
                tracing::warn!(attempt, %err, "error checking track status");
                if attempt >= max {
                    let err = GenerationError::Unreachable {
                        attempts: attempt,
                        last_error: err.to_string(),
                    };
                    on_status(err.status());
                    return Err(err);
                }
            }
        }

        tokio::time::sleep(policy.interval).await;
    }
}

/// Start a generation for `prompt` and poll it to the end.
///
/// An empty prompt is rejected before anything is sent.
pub async fn generate_track(
    backend: &BackendClient,
    prompt: &str,
    policy: PollPolicy,
    mut on_status: impl FnMut(GenerationStatus),
) -> Result<TaskReport, GenerationError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(GenerationError::EmptyPrompt);
    }

    on_status(GenerationStatus::Starting);
    let task_id = match backend.start_generation(&GenerationRequest::new(prompt)).await {
        Ok(task_id) => task_id,
        Err(err) => {
            tracing::error!(%err, "error starting track generation");
            let err = GenerationError::Start(err);
            on_status(err.status());
            return Err(err);
        }
    };
    tracing::info!(task = %task_id, "track generation started");

    poll_generation(
        policy,
        || backend.generation_status(&task_id),
        on_status,
    )
    .await
}
