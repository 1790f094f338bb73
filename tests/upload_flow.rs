mod common;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use common::{json_body, TestApp, FAKE_STORAGE_BASE, TEST_UPLOAD_MAX_BYTES};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Deserialize)]
struct Uploaded {
    url: String,
    name: String,
    #[serde(rename = "type")]
    content_type: String,
}

#[tokio::test]
async fn upload_stores_under_user_prefix() -> Result<()> {
    let app = TestApp::without_db()?;
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id, "ines@example.fr")?;

    let response = app
        .upload(
            "file",
            "Bilan.PDF",
            "application/pdf",
            b"%PDF-1.4 fake",
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded: Uploaded = json_body(response).await?;

    assert_eq!(uploaded.name, "Bilan.PDF");
    assert_eq!(uploaded.content_type, "application/pdf");
    let prefix = format!("{FAKE_STORAGE_BASE}/{user_id}/");
    assert!(uploaded.url.starts_with(&prefix), "{}", uploaded.url);
    assert!(uploaded.url.ends_with(".pdf"));

    let key = uploaded
        .url
        .strip_prefix(&format!("{FAKE_STORAGE_BASE}/"))
        .context("url outside fake storage")?;
    let stored = app.storage().get(key).await.context("object not stored")?;
    assert_eq!(stored.bytes, b"%PDF-1.4 fake");
    assert_eq!(stored.content_type.as_deref(), Some("application/pdf"));
    Ok(())
}

#[tokio::test]
async fn octet_stream_falls_back_to_guessed_type() -> Result<()> {
    let app = TestApp::without_db()?;
    let token = app.token_for(Uuid::new_v4(), "ines@example.fr")?;

    let response = app
        .upload(
            "file",
            "photo.png",
            "application/octet-stream",
            b"\x89PNG",
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let uploaded: Uploaded = json_body(response).await?;
    assert_eq!(uploaded.content_type, "image/png");
    Ok(())
}

#[tokio::test]
async fn oversized_upload_is_rejected() -> Result<()> {
    let app = TestApp::without_db()?;
    let token = app.token_for(Uuid::new_v4(), "ines@example.fr")?;
    let data = vec![0u8; TEST_UPLOAD_MAX_BYTES + 1];

    let response = app
        .upload("file", "gros.bin", "application/octet-stream", &data, Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = json_body(response).await?;
    assert_eq!(body["error"], "File too large (max 1MB)");
    assert_eq!(app.storage().object_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn upload_beyond_the_body_limit_reports_the_size() -> Result<()> {
    let app = TestApp::without_db()?;
    let token = app.token_for(Uuid::new_v4(), "ines@example.fr")?;
    let data = vec![7u8; TEST_UPLOAD_MAX_BYTES * 3];

    let response = app
        .upload("file", "archive.zip", "application/zip", &data, Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = json_body(response).await?;
    assert_eq!(body["error"], "File too large (max 1MB)");
    assert_eq!(app.storage().object_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn missing_file_part_is_rejected() -> Result<()> {
    let app = TestApp::without_db()?;
    let token = app.token_for(Uuid::new_v4(), "ines@example.fr")?;

    let response = app
        .upload("document", "notes.txt", "text/plain", b"hello", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = json_body(response).await?;
    assert_eq!(body["error"], "No file provided");
    Ok(())
}

#[tokio::test]
async fn upload_requires_authentication() -> Result<()> {
    let app = TestApp::without_db()?;
    let response = app
        .upload("file", "notes.txt", "text/plain", b"hello", None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
