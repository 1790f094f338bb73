use axum::extract::State;
use axum::{
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    extract::QueryParams,
    assistant::ask,
    auth::AuthenticatedUser,
    error::AppResult,
    models::{NewVeilleReport, User, VeilleItem, VeilleReport},
    schema::{users, veille_items, veille_reports},
    state::AppState,
    utils::{
        text::{non_blank, take_chars},
        time::to_iso,
    },
};

const DEFAULT_REPORT_TITLE: &str = "Rapport de veille IA";
const SUMMARY_LINES: usize = 3;
const SUMMARY_MAX_CHARS: usize = 200;
// veille_reports.title is VARCHAR(500)
const TITLE_MAX_CHARS: usize = 500;

#[derive(Deserialize)]
pub struct VeilleQuery {
    pub category: Option<String>,
}

#[derive(Serialize)]
pub struct VeilleItemResponse {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub source_url: Option<String>,
    pub published_at: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct VeilleItemList {
    pub items: Vec<VeilleItemResponse>,
}

#[derive(Serialize)]
pub struct ReportResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ReportList {
    pub reports: Vec<ReportResponse>,
}

#[derive(Serialize)]
pub struct ReportEnvelope {
    pub report: ReportResponse,
}

pub async fn list_items(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<VeilleQuery>,
) -> AppResult<Json<VeilleItemList>> {
    let mut conn = state.db()?;
    let mut statement = veille_items::table
        .order(veille_items::published_at.desc())
        .into_boxed();
    if let Some(category) = non_blank(query.category.as_deref()) {
        statement = statement.filter(veille_items::category.eq(category));
    }
    let rows: Vec<VeilleItem> = statement.load(&mut conn)?;

    Ok(Json(VeilleItemList {
        items: rows
            .into_iter()
            .map(|item| VeilleItemResponse {
                id: item.id,
                title: item.title,
                summary: item.summary,
                category: item.category,
                source_url: item.source_url,
                published_at: to_iso(item.published_at),
                created_at: to_iso(item.created_at),
            })
            .collect(),
    }))
}

pub async fn list_reports(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ReportList>> {
    let mut conn = state.db()?;
    let rows: Vec<VeilleReport> = veille_reports::table
        .filter(veille_reports::user_id.eq(user.user_id))
        .order(veille_reports::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(ReportList {
        reports: rows.into_iter().map(report_response).collect(),
    }))
}

pub async fn generate_report(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ReportEnvelope>> {
    let profile: User = {
        let mut conn = state.db()?;
        users::table.find(user.user_id).first(&mut conn)?
    };

    let prompt = report_prompt(&profile);
    let content = ask(
        state.assistant.as_ref(),
        state.config.veille_assistant(),
        &prompt,
        state.poll_settings(),
    )
    .await
    .map_err(|err| {
        error!(error = %err, user_id = %user.user_id, "veille generation failed");
        err
    })?;

    let (title, summary) = parse_report(&content);
    let new_report = NewVeilleReport {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        title,
        content,
        summary,
    };

    let mut conn = state.db()?;
    diesel::insert_into(veille_reports::table)
        .values(&new_report)
        .execute(&mut conn)?;
    let report: VeilleReport = veille_reports::table.find(new_report.id).first(&mut conn)?;

    info!(user_id = %user.user_id, report_id = %report.id, "veille report generated");

    Ok(Json(ReportEnvelope {
        report: report_response(report),
    }))
}

fn report_prompt(profile: &User) -> String {
    let mut prompt =
        String::from("Génère un rapport de veille IA personnalisé pour un professionnel.\n");
    if let Some(job_title) = &profile.job_title {
        prompt.push_str(&format!("Métier : {job_title}\n"));
    }
    if let Some(industry) = &profile.industry {
        prompt.push_str(&format!("Secteur : {industry}\n"));
    }
    if let Some(level) = &profile.experience_level {
        prompt.push_str(&format!("Niveau : {level}\n"));
    }
    prompt.push_str(
        "\nLe rapport doit couvrir :\n\
         - les innovations IA récentes qui le concernent\n\
         - comment les appliquer dans son contexte professionnel\n\
         - des exemples concrets et actionnables\n\
         - les tendances à surveiller\n\n\
         Format : un titre en markdown, un résumé, puis le contenu détaillé en sections.",
    );
    prompt
}

/// Title is the first markdown heading; summary is the opening lines, clipped.
fn parse_report(content: &str) -> (String, String) {
    let title = content
        .lines()
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim())
        .filter(|title| !title.is_empty())
        .map(|title| take_chars(title, TITLE_MAX_CHARS))
        .unwrap_or(DEFAULT_REPORT_TITLE)
        .to_string();

    let opening = content
        .lines()
        .take(SUMMARY_LINES)
        .collect::<Vec<_>>()
        .join(" ");
    let summary = format!("{}...", take_chars(&opening, SUMMARY_MAX_CHARS));

    (title, summary)
}

fn report_response(report: VeilleReport) -> ReportResponse {
    ReportResponse {
        id: report.id,
        user_id: report.user_id,
        title: report.title,
        content: report.content,
        summary: report.summary,
        created_at: to_iso(report.created_at),
    }
}
