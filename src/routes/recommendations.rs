use axum::{extract::State, Json};
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    assistant::ask,
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{AiRecommendation, NewAiRecommendation, User},
    schema::{ai_recommendations, users},
    state::AppState,
    utils::time::to_iso,
};

const UNSPECIFIED: &str = "Non spécifié";

#[derive(Serialize)]
pub struct RecommendationResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recommendations: Value,
    pub created_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRecommendations {
    pub recommendations: Value,
    pub recommendation_id: Uuid,
}

#[derive(Debug, PartialEq, Eq)]
enum ExtractError {
    NoArray,
    InvalidJson,
}

impl From<ExtractError> for AppError {
    fn from(value: ExtractError) -> Self {
        match value {
            ExtractError::NoArray => AppError::internal("Failed to generate recommendations"),
            ExtractError::InvalidJson => AppError::internal("Failed to parse recommendations"),
        }
    }
}

pub async fn latest(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<RecommendationResponse>> {
    let mut conn = state.db()?;
    let row: Option<AiRecommendation> = ai_recommendations::table
        .filter(ai_recommendations::user_id.eq(user.user_id))
        .order(ai_recommendations::created_at.desc())
        .first(&mut conn)
        .optional()?;

    let row = row.ok_or_else(|| AppError::not_found_with("No recommendations yet"))?;
    Ok(Json(RecommendationResponse {
        id: row.id,
        user_id: row.user_id,
        recommendations: row.recommendations,
        created_at: to_iso(row.created_at),
    }))
}

pub async fn generate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<GeneratedRecommendations>> {
    let profile: User = {
        let mut conn = state.db()?;
        users::table.find(user.user_id).first(&mut conn)?
    };

    let reply = ask(
        state.assistant.as_ref(),
        state.config.recommendation_assistant(),
        &recommendation_prompt(&profile),
        state.poll_settings(),
    )
    .await
    .map_err(|err| {
        error!(error = %err, user_id = %user.user_id, "recommendation generation failed");
        err
    })?;

    let recommendations = extract_recommendations(&reply).map_err(|err| {
        error!(user_id = %user.user_id, ?err, "unusable recommendation reply");
        err
    })?;

    let new_row = NewAiRecommendation {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        recommendations: recommendations.clone(),
    };

    let mut conn = state.db()?;
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(ai_recommendations::table)
            .values(&new_row)
            .execute(conn)?;
        diesel::update(users::table.find(user.user_id))
            .set((
                users::onboarding_completed.eq(true),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        Ok(())
    })?;

    info!(user_id = %user.user_id, recommendation_id = %new_row.id, "recommendations generated");

    Ok(Json(GeneratedRecommendations {
        recommendations,
        recommendation_id: new_row.id,
    }))
}

fn recommendation_prompt(profile: &User) -> String {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| UNSPECIFIED.to_string());
    let goals = match &profile.onboarding_data {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    };

    format!(
        "Génère des recommandations d'outils IA personnalisées pour cet utilisateur.\n\n\
         Profil professionnel : {}\n\
         Secteur : {}\n\
         Niveau : {}\n\
         Besoins : {}\n\
         Objectifs : {}\n\n\
         Propose entre 5 et 8 outils IA pertinents, chacun avec son nom, une description courte, \
         un cas d'usage et un lien si disponible.\n\
         Réponds en JSON avec un tableau d'objets.",
        field(&profile.job_title),
        field(&profile.industry),
        field(&profile.experience_level),
        field(&profile.ai_needs),
        goals,
    )
}

/// Parses the span between the first `[` and the last `]` of the reply.
fn extract_recommendations(reply: &str) -> Result<Value, ExtractError> {
    let start = reply.find('[').ok_or(ExtractError::NoArray)?;
    let end = reply.rfind(']').ok_or(ExtractError::NoArray)?;
    if end < start {
        return Err(ExtractError::NoArray);
    }
    serde_json::from_str(&reply[start..=end]).map_err(|_| ExtractError::InvalidJson)
}
