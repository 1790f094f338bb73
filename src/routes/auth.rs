use axum::extract::State;
use axum::{
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    extract::JsonBody,
    auth::{password, AuthenticatedUser},
    config::AppConfig,
    error::{AppError, AppResult},
    models::{NewRefreshToken, NewUser, RefreshToken, User},
    routes::profile::{check_length, ProfileResponse},
    schema::{refresh_tokens, users},
    state::AppState,
    utils::text::non_blank,
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

type SessionResponse = (HeaderMap, Json<LoginResponse>);

pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<ProfileResponse>)> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if payload.password.chars().count() < password::MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LENGTH
        )));
    }

    let full_name = non_blank(payload.full_name.as_deref());
    let phone = non_blank(payload.phone.as_deref());
    check_length("email", &email)?;
    if let Some(full_name) = &full_name {
        check_length("full_name", full_name)?;
    }
    if let Some(phone) = &phone {
        check_length("phone", phone)?;
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        password_hash: password::hash_password(&payload.password)?,
        full_name,
        phone,
    };

    let mut conn = state.db()?;
    match diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("email already registered"));
        }
        Err(err) => return Err(err.into()),
    }

    let user: User = users::table.find(new_user.id).first(&mut conn)?;
    info!(user_id = %user.id, "registered new account");

    Ok((StatusCode::CREATED, Json(ProfileResponse::from(user))))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<SessionResponse> {
    let mut conn = state.db()?;

    let user: User = users::table
        .filter(users::email.eq(normalize_email(&payload.email)))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(user_id = %user.id, "rejected login with wrong password");
        return Err(AppError::unauthorized());
    }

    start_session(&state, &mut conn, &user)
}

/// Trades a live refresh cookie for a new access token and a new cookie.
pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<SessionResponse> {
    let presented = jar
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get(REFRESH_COOKIE_NAME))
        .ok_or_else(AppError::unauthorized)?;

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let token: RefreshToken = refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(hash_refresh_token(presented)))
        .filter(refresh_tokens::revoked_at.is_null())
        .filter(refresh_tokens::expires_at.gt(now))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    diesel::update(refresh_tokens::table.find(token.id))
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let user: User = users::table.find(token.user_id).first(&mut conn)?;
    start_session(&state, &mut conn, &user)
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let presented = jar
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get(REFRESH_COOKIE_NAME))
        .map(hash_refresh_token);

    let mut revoked = match presented.as_deref() {
        Some(hash) => revoke_refresh_tokens(&mut conn, user.user_id, Some(hash))?,
        None => 0,
    };
    if revoked == 0 {
        revoked = revoke_refresh_tokens(&mut conn, user.user_id, None)?;
    }
    info!(user_id = %user.user_id, revoked, "logged out");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, refresh_cookie(&state.config, None)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

/// Issues an access token plus a fresh refresh cookie for `user`.
fn start_session(
    state: &AppState,
    conn: &mut PgConnection,
    user: &User,
) -> AppResult<SessionResponse> {
    let access_token = state.jwt.generate_token(user.id, &user.email)?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_refresh_token(&refresh_value),
            issued_at: now.naive_utc(),
            expires_at: expires_at.naive_utc(),
        })
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        refresh_cookie(&state.config, Some((&refresh_value, expires_at)))?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
        }),
    ))
}

/// Revokes the user's live tokens, only the one with `token_hash` when given.
fn revoke_refresh_tokens(
    conn: &mut PgConnection,
    user_id: Uuid,
    token_hash: Option<&str>,
) -> AppResult<usize> {
    let now = Utc::now().naive_utc();
    let mut target = refresh_tokens::table
        .filter(refresh_tokens::user_id.eq(user_id))
        .filter(refresh_tokens::revoked_at.is_null())
        .into_boxed();
    if let Some(hash) = token_hash {
        target = target.filter(refresh_tokens::token_hash.eq(hash));
    }
    let ids: Vec<Uuid> = target.select(refresh_tokens::id).load(conn)?;
    if ids.is_empty() {
        return Ok(0);
    }

    Ok(
        diesel::update(refresh_tokens::table.filter(refresh_tokens::id.eq_any(&ids)))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(conn)?,
    )
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `Set-Cookie` value for a new refresh token, or one that clears it when `token` is `None`.
fn refresh_cookie(
    config: &AppConfig,
    token: Option<(&str, DateTime<Utc>)>,
) -> AppResult<HeaderValue> {
    let mut parts = match token {
        Some((value, expires_at)) => vec![
            format!("{REFRESH_COOKIE_NAME}={value}"),
            format!(
                "Max-Age={}",
                ChronoDuration::days(config.refresh_token_expiry_days).num_seconds()
            ),
            format!("Expires={}", expires_at.to_rfc2822()),
        ],
        None => vec![
            format!("{REFRESH_COOKIE_NAME}="),
            "Max-Age=0".to_string(),
            "Expires=Thu, 01 Jan 1970 00:00:00 GMT".to_string(),
        ],
    };
    parts.extend(["Path=/", "HttpOnly", "SameSite=Strict"].map(String::from));
    if config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    if let Some(domain) = &config.refresh_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie_config(secure: bool, domain: Option<&str>) -> AppConfig {
        let mut config = AppConfig::for_tests();
        config.refresh_cookie_secure = secure;
        config.refresh_cookie_domain = domain.map(str::to_string);
        config
    }

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Ella@Example.COM "), "ella@example.com");
    }

    #[test]
    fn refresh_tokens_are_random_and_hash_deterministically() {
        let first = generate_refresh_token();
        let second = generate_refresh_token();
        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(hash_refresh_token(&first), hash_refresh_token(&first));
        assert_ne!(hash_refresh_token(&first), first);
    }

    #[test]
    fn refresh_cookie_is_http_only_and_scoped() {
        let config = cookie_config(true, Some("insideai.fr"));
        let cookie = refresh_cookie(&config, Some(("abc", Utc::now()))).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("refresh_token=abc; Max-Age=2592000"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.ends_with("Domain=insideai.fr"));
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let config = cookie_config(false, None);
        let cookie = refresh_cookie(&config, None).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("refresh_token=; Max-Age=0"));
        assert!(!cookie.contains("Secure"));
    }
}
