use axum::extract::{Path, State};
use axum::{
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    extract::{JsonBody, QueryParams},
    assistant::{complete_run, ContentPart, FileAttachment},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{
        Attachment, Conversation, Message, NewConversation, NewMessage, ROLE_ASSISTANT, ROLE_USER,
    },
    schema::{conversations, messages},
    state::AppState,
    utils::{
        text::{non_blank, truncate_with_ellipsis},
        time::to_iso,
    },
};

const TITLE_MAX_CHARS: usize = 50;
const DEFAULT_TITLE: &str = "Nouvelle analyse";
const RECOVERED_TITLE: &str = "Conversation récupérée";
const FILES_ONLY_CONTENT: &str = "Envoi de fichier(s)";
const FILES_ONLY_PROMPT: &str = "Fichier envoyé";
const ATTACHMENT_INSTRUCTIONS: &str = "L'utilisateur a peut-être joint des fichiers. \
Analyse-les en détail : décris les images pour le contexte et lis les documents avant de répondre.";

#[derive(Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "threadId")]
    pub thread_id: Option<Value>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub thread_id: String,
    pub conversation_id: Uuid,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub thread_id: String,
    pub title: String,
    pub assistant_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct ConversationList {
    pub conversations: Vec<ConversationResponse>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub attachments: Value,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageResponse>,
}

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(payload): JsonBody<ChatRequest>,
) -> AppResult<Json<ChatResponse>> {
    let message = non_blank(payload.message.as_deref());
    let attachments = payload.attachments.unwrap_or_default();
    if message.is_none() && attachments.is_empty() {
        return Err(AppError::bad_request("Message or attachments required"));
    }

    let assistant_id = state.config.chat_assistant_id.clone();
    let (thread_id, conversation) = match requested_thread_id(payload.thread_id.as_ref()) {
        Some(thread_id) => {
            let mut conn = state.db()?;
            let conversation =
                find_or_recover_conversation(&mut conn, user.user_id, &thread_id, &assistant_id)?;
            (thread_id, conversation)
        }
        None => {
            let thread_id = state.assistant.create_thread().await.map_err(|err| {
                error!(error = %err, "failed to create assistant thread");
                AppError::from(err)
            })?;
            let new_conversation = NewConversation {
                id: Uuid::new_v4(),
                user_id: user.user_id,
                thread_id: thread_id.clone(),
                title: conversation_title(message.as_deref()),
                assistant_id: assistant_id.clone(),
            };
            let mut conn = state.db()?;
            let conversation = insert_conversation(&mut conn, &new_conversation)?;
            info!(user_id = %user.user_id, %thread_id, "started conversation");
            (thread_id, conversation)
        }
    };

    {
        let mut conn = state.db()?;
        insert_message(
            &mut conn,
            conversation.id,
            ROLE_USER,
            message.as_deref().unwrap_or(FILES_ONLY_CONTENT),
            serde_json::to_value(&attachments)?,
        )?;
    }

    let mut content = Vec::new();
    if let Some(text) = &message {
        content.push(ContentPart::text(text.clone()));
    }
    let mut file_attachments = Vec::new();
    for attachment in &attachments {
        if attachment.is_image() {
            content.push(ContentPart::image_url(attachment.url.clone()));
            continue;
        }
        match forward_document(&state, attachment).await {
            Ok(file) => file_attachments.push(file),
            Err(err) => {
                warn!(error = %err, url = %attachment.url, "skipping attachment that could not be forwarded");
            }
        }
    }
    if content.is_empty() {
        content.push(ContentPart::text(FILES_ONLY_PROMPT));
    }

    let response = run_chat_turn(&state, &thread_id, &assistant_id, content, file_attachments)
        .await
        .map_err(|err| {
            error!(error = %err.message(), %thread_id, "chat turn failed");
            err
        })?;

    let mut conn = state.db()?;
    insert_message(
        &mut conn,
        conversation.id,
        ROLE_ASSISTANT,
        &response,
        Value::Array(Vec::new()),
    )?;
    diesel::update(conversations::table.find(conversation.id))
        .set(conversations::updated_at.eq(Utc::now().naive_utc()))
        .execute(&mut conn)?;

    Ok(Json(ChatResponse {
        response,
        thread_id,
        conversation_id: conversation.id,
    }))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ConversationList>> {
    let mut conn = state.db()?;
    let rows: Vec<Conversation> = conversations::table
        .filter(conversations::user_id.eq(user.user_id))
        .order(conversations::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(ConversationList {
        conversations: rows.into_iter().map(conversation_response).collect(),
    }))
}

pub async fn conversation_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    QueryParams(query): QueryParams<HistoryQuery>,
) -> AppResult<Json<HistoryResponse>> {
    let thread_id = non_blank(query.thread_id.as_deref())
        .ok_or_else(|| AppError::bad_request("Thread ID is required"))?;

    let mut conn = state.db()?;
    let conversation: Conversation = conversations::table
        .filter(conversations::thread_id.eq(&thread_id))
        .filter(conversations::user_id.eq(user.user_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("Conversation not found"))?;

    let rows: Vec<Message> = messages::table
        .filter(messages::conversation_id.eq(conversation.id))
        .order((messages::created_at.asc(), messages::id.asc()))
        .load(&mut conn)?;

    Ok(Json(HistoryResponse {
        messages: rows.into_iter().map(message_response).collect(),
    }))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        conversations::table
            .find(conversation_id)
            .filter(conversations::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;

    if deleted == 0 {
        return Err(AppError::not_found_with("Conversation not found"));
    }

    info!(user_id = %user.user_id, %conversation_id, "deleted conversation");
    Ok(StatusCode::NO_CONTENT)
}

async fn run_chat_turn(
    state: &AppState,
    thread_id: &str,
    assistant_id: &str,
    content: Vec<ContentPart>,
    attachments: Vec<FileAttachment>,
) -> AppResult<String> {
    let api = state.assistant.as_ref();
    api.add_message(thread_id, content, attachments).await?;
    let run = api
        .create_run(thread_id, assistant_id, Some(ATTACHMENT_INSTRUCTIONS))
        .await?;
    Ok(complete_run(api, thread_id, &run, state.poll_settings()).await?)
}

/// Uploads a non-image attachment to the assistant so its tools can read it.
async fn forward_document(
    state: &AppState,
    attachment: &Attachment,
) -> anyhow::Result<FileAttachment> {
    let bytes = match state.storage.key_for_public_url(&attachment.url) {
        Some(key) => state.storage.get_object(&key).await?,
        None => state
            .http
            .get(&attachment.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec(),
    };

    let file_id = state
        .assistant
        .upload_file(&attachment.name, Some(&attachment.content_type), bytes)
        .await?;
    info!(%file_id, name = %attachment.name, "forwarded attachment to assistant");
    Ok(FileAttachment::for_analysis(file_id))
}

fn requested_thread_id(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty() && trimmed != "undefined" && trimmed != "new")
                .then(|| trimmed.to_string())
        }
        _ => None,
    }
}

fn conversation_title(message: Option<&str>) -> String {
    match message {
        Some(text) => truncate_with_ellipsis(text, TITLE_MAX_CHARS),
        None => DEFAULT_TITLE.to_string(),
    }
}

fn find_or_recover_conversation(
    conn: &mut PgConnection,
    user_id: Uuid,
    thread_id: &str,
    assistant_id: &str,
) -> AppResult<Conversation> {
    let existing: Option<Conversation> = conversations::table
        .filter(conversations::thread_id.eq(thread_id))
        .first(conn)
        .optional()?;

    match existing {
        Some(conversation) if conversation.user_id == user_id => Ok(conversation),
        Some(_) => Err(AppError::not_found_with("Conversation not found")),
        None => {
            warn!(%user_id, %thread_id, "thread has no local conversation; recovering");
            insert_conversation(
                conn,
                &NewConversation {
                    id: Uuid::new_v4(),
                    user_id,
                    thread_id: thread_id.to_string(),
                    title: RECOVERED_TITLE.to_string(),
                    assistant_id: assistant_id.to_string(),
                },
            )
        }
    }
}

fn insert_conversation(
    conn: &mut PgConnection,
    new_conversation: &NewConversation,
) -> AppResult<Conversation> {
    diesel::insert_into(conversations::table)
        .values(new_conversation)
        .execute(conn)?;
    Ok(conversations::table.find(new_conversation.id).first(conn)?)
}

fn insert_message(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    role: &str,
    content: &str,
    attachments: Value,
) -> AppResult<()> {
    let new_message = NewMessage {
        id: Uuid::new_v4(),
        conversation_id,
        role: role.to_string(),
        content: content.to_string(),
        attachments,
    };
    diesel::insert_into(messages::table)
        .values(&new_message)
        .execute(conn)?;
    Ok(())
}

fn conversation_response(conversation: Conversation) -> ConversationResponse {
    ConversationResponse {
        id: conversation.id,
        user_id: conversation.user_id,
        thread_id: conversation.thread_id,
        title: conversation.title,
        assistant_id: conversation.assistant_id,
        created_at: to_iso(conversation.created_at),
        updated_at: to_iso(conversation.updated_at),
    }
}

fn message_response(message: Message) -> MessageResponse {
    MessageResponse {
        id: message.id,
        conversation_id: message.conversation_id,
        role: message.role,
        content: message.content,
        attachments: message.attachments,
        created_at: to_iso(message.created_at),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn placeholder_thread_ids_start_a_new_thread() {
        assert_eq!(requested_thread_id(None), None);
        assert_eq!(requested_thread_id(Some(&json!("new"))), None);
        assert_eq!(requested_thread_id(Some(&json!("undefined"))), None);
        assert_eq!(requested_thread_id(Some(&json!(""))), None);
        assert_eq!(requested_thread_id(Some(&json!(42))), None);
        assert_eq!(requested_thread_id(Some(&Value::Null)), None);
        assert_eq!(
            requested_thread_id(Some(&json!("thread_abc"))),
            Some("thread_abc".to_string())
        );
    }

    #[test]
    fn title_is_cut_at_fifty_characters() {
        let long = "é".repeat(60);
        let title = conversation_title(Some(&long));
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));

        assert_eq!(conversation_title(Some("Bonjour")), "Bonjour");
        assert_eq!(conversation_title(None), DEFAULT_TITLE);
    }

    #[test]
    fn chat_request_accepts_loose_client_payloads() {
        let request: ChatRequest = serde_json::from_value(json!({
            "message": "Analyse ce fichier",
            "threadId": null,
            "attachments": [{ "url": "https://cdn/x.pdf", "name": "x.pdf", "type": "application/pdf" }]
        }))
        .unwrap();
        assert_eq!(requested_thread_id(request.thread_id.as_ref()), None);
        let attachments = request.attachments.unwrap();
        assert_eq!(attachments.len(), 1);
        assert!(!attachments[0].is_image());

        let bare: ChatRequest = serde_json::from_value(json!({ "attachments": null })).unwrap();
        assert!(bare.message.is_none());
        assert!(bare.attachments.is_none());
    }
}
