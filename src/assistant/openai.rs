use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Method, RequestBuilder,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AppConfig;

use super::{
    AssistantApi, AssistantError, AssistantResult, AssistantSummary, AssistantUpdate,
    ContentPart, FileAttachment, Run,
};

const BETA_HEADER: &str = "OpenAI-Beta";
const BETA_VALUE: &str = "assistants=v2";

/// Assistants v2 client over plain HTTP.
pub struct OpenAiAssistant {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent {
    Text { text: TextValue },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextValue {
    value: String,
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    role: &'a str,
    content: &'a [ContentPart],
    #[serde(skip_serializing_if = "is_empty")]
    attachments: &'a [FileAttachment],
}

#[derive(Serialize)]
struct CreateRun<'a> {
    assistant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional_instructions: Option<&'a str>,
}

impl OpenAiAssistant {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build assistant HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(&config.openai_base_url, &config.openai_api_key)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header(BETA_HEADER, BETA_VALUE)
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> AssistantResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Api {
                status: status.as_u16(),
                message: api_error_message(&body)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl AssistantApi for OpenAiAssistant {
    async fn create_thread(&self) -> AssistantResult<String> {
        let created: IdResponse =
            Self::send(self.request(Method::POST, "threads").json(&json!({}))).await?;
        Ok(created.id)
    }

    async fn add_message(
        &self,
        thread_id: &str,
        content: Vec<ContentPart>,
        attachments: Vec<FileAttachment>,
    ) -> AssistantResult<()> {
        let body = CreateMessage {
            role: "user",
            content: &content,
            attachments: &attachments,
        };
        let _: Value = Self::send(
            self.request(Method::POST, &format!("threads/{thread_id}/messages"))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        additional_instructions: Option<&str>,
    ) -> AssistantResult<Run> {
        let body = CreateRun {
            assistant_id,
            additional_instructions,
        };
        Self::send(
            self.request(Method::POST, &format!("threads/{thread_id}/runs"))
                .json(&body),
        )
        .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> AssistantResult<Run> {
        Self::send(self.request(Method::GET, &format!("threads/{thread_id}/runs/{run_id}"))).await
    }

    async fn latest_message_text(&self, thread_id: &str) -> AssistantResult<Option<String>> {
        let list: MessageList = Self::send(
            self.request(Method::GET, &format!("threads/{thread_id}/messages"))
                .query(&[("order", "desc"), ("limit", "1")]),
        )
        .await?;
        Ok(first_assistant_text(list))
    }

    async fn upload_file(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> AssistantResult<String> {
        let mut part = Part::bytes(bytes).file_name(filename.to_string());
        if let Some(content_type) = content_type {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new().text("purpose", "assistants").part("file", part);

        let uploaded: IdResponse =
            Self::send(self.request(Method::POST, "files").multipart(form)).await?;
        Ok(uploaded.id)
    }

    async fn update_assistant(
        &self,
        assistant_id: &str,
        update: &AssistantUpdate,
    ) -> AssistantResult<AssistantSummary> {
        Self::send(
            self.request(Method::POST, &format!("assistants/{assistant_id}"))
                .json(update),
        )
        .await
    }
}

fn is_empty<T>(items: &&[T]) -> bool {
    items.is_empty()
}

fn first_assistant_text(list: MessageList) -> Option<String> {
    let message = list.data.into_iter().next()?;
    if message.role != "assistant" {
        return None;
    }
    match message.content.into_iter().next()? {
        MessageContent::Text { text } => Some(text.value),
        MessageContent::Other => None,
    }
}

fn api_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Err(_) => Some(trimmed.chars().take(300).collect()),
    }
}
