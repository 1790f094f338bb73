use axum::extract::State;
use axum::{
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    extract::{JsonBody, QueryParams},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{
        Attachment, CommunityMessage, CommunityPost, NewCommunityMessage, NewCommunityPost,
    },
    schema::{community_messages, community_posts, users},
    state::AppState,
    utils::{text::non_blank, time::to_iso},
};

pub const DEFAULT_CHANNEL: &str = "general";
const MESSAGE_PAGE_SIZE: i64 = 100;
const POST_PAGE_SIZE: i64 = 50;
const MAX_CHANNEL_LEN: usize = 64;

#[derive(Deserialize)]
pub struct ChannelQuery {
    pub channel: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Serialize)]
pub struct CommunityMessageResponse {
    pub id: Uuid,
    pub channel_id: String,
    pub user_id: Uuid,
    pub content: String,
    pub attachments: Value,
    pub created_at: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Serialize)]
pub struct MessageList {
    pub messages: Vec<CommunityMessageResponse>,
}

#[derive(Serialize)]
pub struct MessageEnvelope {
    pub message: CommunityMessageResponse,
}

#[derive(Serialize)]
pub struct PostAuthor {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub job_title: Option<String>,
}

#[derive(Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub likes_count: i32,
    pub comments_count: i32,
    pub created_at: String,
    pub updated_at: String,
    pub user: PostAuthor,
}

#[derive(Serialize)]
pub struct PostList {
    pub posts: Vec<PostResponse>,
}

#[derive(Serialize)]
pub struct PostEnvelope {
    pub post: PostResponse,
}

type AuthorColumns = (Uuid, Option<String>, Option<String>, Option<String>);

pub async fn list_messages(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<ChannelQuery>,
) -> AppResult<Json<MessageList>> {
    let channel = channel_or_default(query.channel.as_deref())?;

    let mut conn = state.db()?;
    let mut rows: Vec<(CommunityMessage, Option<String>, Option<String>)> =
        community_messages::table
            .inner_join(users::table)
            .filter(community_messages::channel_id.eq(&channel))
            .order((
                community_messages::created_at.desc(),
                community_messages::id.desc(),
            ))
            .limit(MESSAGE_PAGE_SIZE)
            .select((
                community_messages::all_columns,
                users::full_name,
                users::avatar_url,
            ))
            .load(&mut conn)?;
    rows.reverse();

    let messages = rows
        .into_iter()
        .map(|(message, full_name, avatar_url)| {
            message_response(message, full_name, avatar_url)
        })
        .collect();

    Ok(Json(MessageList { messages }))
}

pub async fn post_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(payload): JsonBody<PostMessageRequest>,
) -> AppResult<Json<MessageEnvelope>> {
    let content = non_blank(payload.content.as_deref());
    let attachments = payload.attachments.unwrap_or_default();
    if content.is_none() && attachments.is_empty() {
        return Err(AppError::bad_request("Content or attachments required"));
    }
    let channel = channel_or_default(payload.channel_id.as_deref())?;

    let new_message = NewCommunityMessage {
        id: Uuid::new_v4(),
        channel_id: channel,
        user_id: user.user_id,
        content: content.unwrap_or_default(),
        attachments: serde_json::to_value(&attachments)?,
    };

    let mut conn = state.db()?;
    diesel::insert_into(community_messages::table)
        .values(&new_message)
        .execute(&mut conn)?;

    let (message, full_name, avatar_url): (CommunityMessage, Option<String>, Option<String>) =
        community_messages::table
            .inner_join(users::table)
            .filter(community_messages::id.eq(new_message.id))
            .select((
                community_messages::all_columns,
                users::full_name,
                users::avatar_url,
            ))
            .first(&mut conn)?;

    info!(user_id = %user.user_id, channel = %message.channel_id, "community message posted");

    Ok(Json(MessageEnvelope {
        message: message_response(message, full_name, avatar_url),
    }))
}

pub async fn list_posts(State(state): State<AppState>) -> AppResult<Json<PostList>> {
    let mut conn = state.db()?;
    let rows: Vec<(CommunityPost, AuthorColumns)> = community_posts::table
        .inner_join(users::table)
        .order((community_posts::created_at.desc(), community_posts::id.desc()))
        .limit(POST_PAGE_SIZE)
        .select((community_posts::all_columns, author_columns()))
        .load(&mut conn)?;

    Ok(Json(PostList {
        posts: rows
            .into_iter()
            .map(|(post, author)| post_response(post, author))
            .collect(),
    }))
}

pub async fn create_post(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(payload): JsonBody<CreatePostRequest>,
) -> AppResult<Json<PostEnvelope>> {
    let content = non_blank(payload.content.as_deref())
        .ok_or_else(|| AppError::bad_request("Content is required"))?;

    let new_post = NewCommunityPost {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        content,
        likes_count: 0,
        comments_count: 0,
    };

    let mut conn = state.db()?;
    diesel::insert_into(community_posts::table)
        .values(&new_post)
        .execute(&mut conn)?;

    let (post, author): (CommunityPost, AuthorColumns) = community_posts::table
        .inner_join(users::table)
        .filter(community_posts::id.eq(new_post.id))
        .select((community_posts::all_columns, author_columns()))
        .first(&mut conn)?;

    info!(user_id = %user.user_id, post_id = %post.id, "community post created");

    Ok(Json(PostEnvelope {
        post: post_response(post, author),
    }))
}

fn author_columns() -> (
    users::id,
    users::full_name,
    users::avatar_url,
    users::job_title,
) {
    (
        users::id,
        users::full_name,
        users::avatar_url,
        users::job_title,
    )
}

fn channel_or_default(raw: Option<&str>) -> AppResult<String> {
    let channel = non_blank(raw).unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
    if channel.chars().count() > MAX_CHANNEL_LEN {
        return Err(AppError::bad_request("channel name is too long"));
    }
    Ok(channel)
}

fn message_response(
    message: CommunityMessage,
    full_name: Option<String>,
    avatar_url: Option<String>,
) -> CommunityMessageResponse {
    CommunityMessageResponse {
        id: message.id,
        channel_id: message.channel_id,
        user_id: message.user_id,
        content: message.content,
        attachments: message.attachments,
        created_at: to_iso(message.created_at),
        full_name,
        avatar_url,
    }
}

fn post_response(post: CommunityPost, author: AuthorColumns) -> PostResponse {
    let (id, full_name, avatar_url, job_title) = author;
    PostResponse {
        id: post.id,
        user_id: post.user_id,
        content: post.content,
        likes_count: post.likes_count,
        comments_count: post.comments_count,
        created_at: to_iso(post.created_at),
        updated_at: to_iso(post.updated_at),
        user: PostAuthor {
            id,
            full_name,
            avatar_url,
            job_title,
        },
    }
}
