use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let max_bytes = state.config.upload_max_bytes;
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, max_bytes))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("file").to_string();
        let content_type = field.content_type().map(|mime| mime.to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| multipart_error(err, max_bytes))?
        {
            if data.len() + chunk.len() > max_bytes {
                warn!(user_id = %user.user_id, max_bytes, "upload over the size limit");
                return Err(file_too_large(max_bytes));
            }
            data.extend_from_slice(&chunk);
        }
        file = Some((name, content_type, data));
    }

    let (name, content_type, bytes) = match file {
        Some(file) if !file.2.is_empty() => file,
        _ => return Err(AppError::bad_request("No file provided")),
    };

    let content_type = content_type
        .filter(|value| !value.is_empty() && value != "application/octet-stream")
        .unwrap_or_else(|| {
            mime_guess::from_path(&name)
                .first_or_octet_stream()
                .to_string()
        });
    let key = object_key(user.user_id, Uuid::new_v4(), &name);
    let size = bytes.len();

    state
        .storage
        .put_object(&key, bytes, Some(content_type.clone()))
        .await
        .map_err(|err| {
            error!(error = %err, %key, "upload to object storage failed");
            AppError::internal(err)
        })?;

    info!(user_id = %user.user_id, %key, size, "stored upload");

    Ok(Json(UploadResponse {
        url: state.storage.public_url(&key),
        name,
        content_type,
    }))
}

fn file_too_large(max_bytes: usize) -> AppError {
    AppError::bad_request(format!("File too large (max {}MB)", max_bytes / (1024 * 1024)))
}

/// Body-limit failures read as an oversized file; anything else is malformed input.
fn multipart_error(err: MultipartError, max_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return file_too_large(max_bytes);
    }
    error!(error = %err, "invalid multipart data");
    AppError::bad_request(format!("invalid multipart data: {err}"))
}

/// `<user>/<object>.<ext>`, without the dot when the name has no extension.
pub fn object_key(user_id: Uuid, object_id: Uuid, file_name: &str) -> String {
    match extension(file_name) {
        Some(ext) => format!("{user_id}/{object_id}.{ext}"),
        None => format!("{user_id}/{object_id}"),
    }
}

fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_keeps_extension() {
        let user = Uuid::nil();
        let object = Uuid::from_u128(1);
        assert_eq!(
            object_key(user, object, "Rapport Final.PDF"),
            format!("{user}/{object}.pdf")
        );
    }

    #[test]
    fn object_key_without_usable_extension() {
        let user = Uuid::nil();
        let object = Uuid::from_u128(2);
        assert_eq!(object_key(user, object, "README"), format!("{user}/{object}"));
        assert_eq!(object_key(user, object, ".env"), format!("{user}/{object}"));
        assert_eq!(object_key(user, object, "bad.e/x"), format!("{user}/{object}"));
    }
}
