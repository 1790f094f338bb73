//! Conversational-assistant integration: threads, messages, runs and the
//! run polling loop shared by the chat, veille and recommendation routes.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::config::AppConfig;

pub mod openai;

pub use openai::OpenAiAssistant;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("assistant API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Assistant timeout after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("Assistant error: {0}")]
    RunFailed(String),
    #[error("Failed to get response (run status: {0})")]
    RunEnded(RunStatus),
    #[error("assistant returned no text response")]
    EmptyResponse,
}

pub type AssistantResult<T> = Result<T, AssistantError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: "auto".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantTool {
    CodeInterpreter,
    FileSearch,
}

/// A previously uploaded file made available to the tools of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttachment {
    pub file_id: String,
    pub tools: Vec<AssistantTool>,
}

impl FileAttachment {
    pub fn for_analysis(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            tools: vec![AssistantTool::CodeInterpreter, AssistantTool::FileSearch],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantUpdate {
    pub instructions: String,
    pub name: String,
    pub model: String,
    pub tools: Vec<AssistantTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[async_trait]
pub trait AssistantApi: Send + Sync + 'static {
    async fn create_thread(&self) -> AssistantResult<String>;

    async fn add_message(
        &self,
        thread_id: &str,
        content: Vec<ContentPart>,
        attachments: Vec<FileAttachment>,
    ) -> AssistantResult<()>;

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        additional_instructions: Option<&str>,
    ) -> AssistantResult<Run>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> AssistantResult<Run>;

    /// Text of the newest assistant message on the thread, if it has one.
    async fn latest_message_text(&self, thread_id: &str) -> AssistantResult<Option<String>>;

    /// Uploads a file for assistant use and returns its id.
    async fn upload_file(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> AssistantResult<String>;

    async fn update_assistant(
        &self,
        assistant_id: &str,
        update: &AssistantUpdate,
    ) -> AssistantResult<AssistantSummary>;
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: config.assistant_poll_interval(),
            timeout: config.assistant_run_timeout(),
        }
    }
}

/// Polls a run until it leaves `queued`/`in_progress` or the timeout elapses.
pub async fn wait_for_run(
    api: &dyn AssistantApi,
    thread_id: &str,
    run_id: &str,
    poll: PollSettings,
) -> AssistantResult<Run> {
    let started = Instant::now();
    let mut run = api.retrieve_run(thread_id, run_id).await?;

    while run.status.is_pending() {
        if started.elapsed() > poll.timeout {
            warn!(%thread_id, %run_id, status = %run.status, "assistant run timed out");
            return Err(AssistantError::Timeout(poll.timeout));
        }
        sleep(poll.interval).await;
        run = api.retrieve_run(thread_id, run_id).await?;
    }

    Ok(run)
}

/// Waits for `run` and turns its terminal state into the reply text.
pub async fn complete_run(
    api: &dyn AssistantApi,
    thread_id: &str,
    run: &Run,
    poll: PollSettings,
) -> AssistantResult<String> {
    let finished = wait_for_run(api, thread_id, &run.id, poll).await?;

    match finished.status {
        RunStatus::Completed => api
            .latest_message_text(thread_id)
            .await?
            .ok_or(AssistantError::EmptyResponse),
        RunStatus::Failed => {
            let (code, message) = match finished.last_error {
                Some(err) => (err.code, err.message),
                None => (None, "Unknown error".to_string()),
            };
            warn!(
                %thread_id,
                run_id = %finished.id,
                code = code.as_deref().unwrap_or("none"),
                "assistant run failed"
            );
            Err(AssistantError::RunFailed(message))
        }
        other => Err(AssistantError::RunEnded(other)),
    }
}

/// One-shot prompt on a fresh thread.
pub async fn ask(
    api: &dyn AssistantApi,
    assistant_id: &str,
    prompt: &str,
    poll: PollSettings,
) -> AssistantResult<String> {
    let thread_id = api.create_thread().await?;
    api.add_message(&thread_id, vec![ContentPart::text(prompt)], Vec::new())
        .await?;
    let run = api.create_run(&thread_id, assistant_id, None).await?;
    complete_run(api, &thread_id, &run, poll).await
}
