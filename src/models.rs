use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// A file reference as returned by the upload route and stored on messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub industry: Option<String>,
    pub experience_level: Option<String>,
    pub ai_needs: Option<String>,
    pub onboarding_completed: bool,
    pub onboarding_data: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = conversations)]
#[diesel(belongs_to(User))]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub thread_id: String,
    pub title: String,
    pub assistant_id: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub thread_id: String,
    pub title: String,
    pub assistant_id: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = messages)]
#[diesel(belongs_to(Conversation))]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub attachments: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub attachments: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = community_messages)]
#[diesel(belongs_to(User))]
pub struct CommunityMessage {
    pub id: Uuid,
    pub channel_id: String,
    pub user_id: Uuid,
    pub content: String,
    pub attachments: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = community_messages)]
pub struct NewCommunityMessage {
    pub id: Uuid,
    pub channel_id: String,
    pub user_id: Uuid,
    pub content: String,
    pub attachments: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = community_posts)]
#[diesel(belongs_to(User))]
pub struct CommunityPost {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub likes_count: i32,
    pub comments_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = community_posts)]
pub struct NewCommunityPost {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub likes_count: i32,
    pub comments_count: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = veille_items)]
pub struct VeilleItem {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub source_url: Option<String>,
    pub published_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = veille_items)]
pub struct NewVeilleItem {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub source_url: Option<String>,
    pub published_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = veille_reports)]
#[diesel(belongs_to(User))]
pub struct VeilleReport {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = veille_reports)]
pub struct NewVeilleReport {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub summary: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ai_recommendations)]
#[diesel(belongs_to(User))]
pub struct AiRecommendation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recommendations: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ai_recommendations)]
pub struct NewAiRecommendation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recommendations: serde_json::Value,
}
