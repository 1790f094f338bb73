use axum::{extract::State, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    extract::JsonBody,
    models::User,
    schema::users,
    state::AppState,
    utils::{json::text_patch, time::to_iso},
};

pub const EXPERIENCE_LEVELS: [&str; 3] = ["beginner", "intermediate", "advanced"];

// VARCHAR widths of the users table.
const BOUNDED_FIELDS: [(&str, usize); 5] = [
    ("email", 255),
    ("full_name", 255),
    ("phone", 32),
    ("job_title", 255),
    ("industry", 255),
];

#[derive(Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub industry: Option<String>,
    pub experience_level: Option<String>,
    pub ai_needs: Option<String>,
    pub onboarding_completed: bool,
    pub onboarding_data: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            phone: user.phone,
            job_title: user.job_title,
            bio: user.bio,
            avatar_url: user.avatar_url,
            industry: user.industry,
            experience_level: user.experience_level,
            ai_needs: user.ai_needs,
            onboarding_completed: user.onboarding_completed,
            onboarding_data: user.onboarding_data,
            created_at: to_iso(user.created_at),
            updated_at: to_iso(user.updated_at),
        }
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UpdateProfileChangeset {
    full_name: Option<Option<String>>,
    phone: Option<Option<String>>,
    job_title: Option<Option<String>>,
    bio: Option<Option<String>>,
    avatar_url: Option<Option<String>>,
    industry: Option<Option<String>>,
    experience_level: Option<Option<String>>,
    ai_needs: Option<Option<String>>,
    updated_at: Option<chrono::NaiveDateTime>,
}

#[derive(Deserialize)]
pub struct OnboardingRequest {
    #[serde(default)]
    pub answers: Value,
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let profile: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(ProfileResponse::from(profile)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(body): JsonBody<Value>,
) -> AppResult<Json<ProfileResponse>> {
    let mut changeset = UpdateProfileChangeset {
        full_name: text_change(&body, "full_name")?,
        phone: text_change(&body, "phone")?,
        job_title: text_change(&body, "job_title")?,
        bio: text_change(&body, "bio")?,
        avatar_url: text_change(&body, "avatar_url")?,
        industry: text_change(&body, "industry")?,
        experience_level: text_change(&body, "experience_level")?,
        ai_needs: text_change(&body, "ai_needs")?,
        updated_at: None,
    };

    if let Some(Some(level)) = &changeset.experience_level {
        if !EXPERIENCE_LEVELS.contains(&level.as_str()) {
            return Err(AppError::bad_request(format!(
                "experience_level must be one of {}",
                EXPERIENCE_LEVELS.join(", ")
            )));
        }
    }
    changeset.updated_at = Some(Utc::now().naive_utc());

    let mut conn = state.db()?;
    let updated = diesel::update(users::table.find(user.user_id))
        .set(&changeset)
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found());
    }

    let profile: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(ProfileResponse::from(profile)))
}

pub async fn complete_onboarding(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    JsonBody(payload): JsonBody<OnboardingRequest>,
) -> AppResult<Json<ProfileResponse>> {
    let answers = match payload.answers {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };

    let mut conn = state.db()?;
    let flipped = diesel::update(
        users::table
            .find(user.user_id)
            .filter(users::onboarding_completed.eq(false)),
    )
    .set((
        users::onboarding_completed.eq(true),
        users::onboarding_data.eq(answers),
        users::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(&mut conn)?;

    if flipped > 0 {
        info!(user_id = %user.user_id, "onboarding completed");
    }

    let profile: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(ProfileResponse::from(profile)))
}

fn text_change(body: &Value, field: &str) -> AppResult<Option<Option<String>>> {
    let change = text_patch(body, field)
        .map(|patch| patch.into_change())
        .map_err(|err| AppError::bad_request(format!("{field}: {err}")))?;
    if let Some(Some(value)) = &change {
        check_length(field, value)?;
    }
    Ok(change)
}

/// Rejects values wider than the column they are stored in.
pub(crate) fn check_length(field: &str, value: &str) -> AppResult<()> {
    let limit = BOUNDED_FIELDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, limit)| *limit);
    match limit {
        Some(limit) if value.chars().count() > limit => Err(AppError::bad_request(format!(
            "{field} must be at most {limit} characters"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_change_maps_onto_changeset_shape() {
        let body = json!({ "bio": null, "job_title": " Coach " });

        assert_eq!(text_change(&body, "full_name").unwrap(), None);
        assert_eq!(text_change(&body, "bio").unwrap(), Some(None));
        assert_eq!(
            text_change(&body, "job_title").unwrap(),
            Some(Some("Coach".to_string()))
        );
    }

    #[test]
    fn text_change_rejects_non_string() {
        let err = text_change(&json!({ "bio": 12 }), "bio").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.message().starts_with("bio:"));
    }

    #[test]
    fn values_wider_than_their_column_are_rejected() {
        let body = json!({ "phone": "0".repeat(33), "bio": "x".repeat(5000) });

        let err = text_change(&body, "phone").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "phone must be at most 32 characters");
        assert!(text_change(&body, "bio").is_ok());
        assert!(check_length("full_name", &"é".repeat(255)).is_ok());
    }
}
