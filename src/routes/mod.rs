use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod chat;
pub mod community;
pub mod health;
pub mod profile;
pub mod recommendations;
pub mod upload;
pub mod veille;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => AllowOrigin::list(parse_origins(origins)),
        None => AllowOrigin::mirror_request(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    // Multipart framing adds a little on top of the file itself.
    let body_limit = state.config.upload_max_bytes.saturating_mul(2);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let profile_routes = Router::new()
        .route(
            "/",
            get(profile::get_profile).patch(profile::update_profile),
        )
        .route("/onboarding", post(profile::complete_onboarding));

    let chat_routes = Router::new()
        .route("/", post(chat::send_message))
        .route("/history", get(chat::conversation_history))
        .route("/conversations", get(chat::list_conversations))
        .route("/conversations/:id", delete(chat::delete_conversation));

    let community_routes = Router::new()
        .route(
            "/messages",
            get(community::list_messages).post(community::post_message),
        )
        .route(
            "/posts",
            get(community::list_posts).post(community::create_post),
        );

    let veille_routes = Router::new()
        .route("/", get(veille::list_items))
        .route("/reports", get(veille::list_reports))
        .route("/generate", post(veille::generate_report));

    let recommendation_routes = Router::new()
        .route("/", get(recommendations::latest))
        .route("/generate", post(recommendations::generate));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/profile", profile_routes)
        .nest("/api/chat", chat_routes)
        .nest("/api/communaute", community_routes)
        .nest("/api/veille", veille_routes)
        .nest("/api/recommendations", recommendation_routes)
        .route("/api/upload", post(upload::upload_file))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

fn parse_origins(origins: &str) -> Vec<HeaderValue> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}
