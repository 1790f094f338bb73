use std::sync::Arc;
use std::time::Duration;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    assistant::{AssistantApi, PollSettings},
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    storage::ObjectStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Upper bound for downloading a chat attachment hosted outside our bucket.
const ATTACHMENT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub assistant: Arc<dyn AssistantApi>,
    pub jwt: JwtService,
    /// Plain HTTP client for fetching foreign attachment URLs.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        assistant: Arc<dyn AssistantApi>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            assistant,
            jwt,
            http: reqwest::Client::builder()
                .timeout(ATTACHMENT_FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::from_config(&self.config)
    }
}
