use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use serde_json::json;

use crate::api::models::{
    ActiveCall, CallsPage, DiarizationChunk, SessionInfo, TranslateRequest, TranslateResponse,
    TranscriptRow,
};
use crate::settings::UserSettings;

/// HTTP client for the dashboard backend and the realtime database's REST
/// query surface.
///
/// `base_url` is the application backend (`/api/...`); `db_url`/`db_key`
/// address the realtime database directly for the two tables the live views
/// query without going through the backend (`vapi_calls`, `transcripts`),
/// matching how the original dashboard reads them.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    db_url: String,
    db_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, db_url: impl Into<String>, db_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            db_url: db_url.into().trim_end_matches('/').to_string(),
            db_key: db_key.into(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn db(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.db_url, table)
    }

    // ===== Call list =====

    /// `GET /api/calls?offset&limit`. The `_t` parameter busts intermediary
    /// caches, as the original client does.
    pub async fn get_calls(&self, offset: usize, limit: usize) -> Result<CallsPage> {
        let response = self
            .http
            .get(self.api("/api/calls"))
            .query(&[
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
                ("_t", Utc::now().timestamp_millis().to_string()),
            ])
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch calls: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to fetch calls: HTTP {}", response.status()));
        }
        Ok(response.json().await?)
    }

    /// Active (non-ended) calls created within `lookback`, newest first.
    pub async fn get_active_calls(&self, lookback: Duration, limit: usize) -> Result<Vec<ActiveCall>> {
        let since = (Utc::now() - lookback).to_rfc3339();
        let response = self
            .http
            .get(self.db("vapi_calls"))
            .header("apikey", &self.db_key)
            .query(&[
                ("select", "*".to_string()),
                ("status", "neq.ended".to_string()),
                ("created_at", format!("gt.{}", since)),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to fetch active calls: HTTP {}",
                response.status()
            ));
        }
        Ok(response.json().await?)
    }

    // ===== Live transcripts =====

    /// Full transcript history for one call, oldest first.
    pub async fn get_transcript_history(&self, call_id: &str) -> Result<Vec<TranscriptRow>> {
        let response = self
            .http
            .get(self.db("transcripts"))
            .header("apikey", &self.db_key)
            .query(&[
                ("select", "*"),
                ("call_id", &format!("eq.{}", call_id)),
                ("order", "timestamp.asc"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to fetch transcript history: HTTP {}",
                response.status()
            ));
        }
        Ok(response.json().await?)
    }

    // ===== Call mutation =====

    pub async fn update_diarization(&self, call_id: i64, chunks: &[DiarizationChunk]) -> Result<()> {
        let response = self
            .http
            .put(self.api(&format!("/api/calls/{}/diarization", call_id)))
            .json(&json!({ "diarization_data": chunks }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to save diarization edits: HTTP {}",
                response.status()
            ));
        }
        Ok(())
    }

    pub async fn translate(&self, request: &TranslateRequest) -> Result<TranslateResponse> {
        let response = self
            .http
            .post(self.api("/api/translate"))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Translation failed: HTTP {}", response.status()));
        }
        Ok(response.json().await?)
    }

    /// Admin-gated hard delete.
    pub async fn delete_call(&self, call_id: i64, password: &str) -> Result<()> {
        let response = self
            .http
            .post(self.api("/api/admin/delete-call"))
            .json(&json!({ "call_id": call_id, "password": password }))
            .send()
            .await?;

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        if body.get("success").and_then(|v| v.as_bool()) == Some(true) {
            Ok(())
        } else {
            let msg = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("delete rejected");
            Err(anyhow!("Failed to delete call {}: {}", call_id, msg))
        }
    }

    /// Hand a finished widget call's recording to the backend pipeline.
    pub async fn trigger_vapi_call(&self, recording_url: &str, filename: &str) -> Result<()> {
        let response = self
            .http
            .post(self.api("/api/vapi-call"))
            .json(&json!({ "recording_url": recording_url, "filename": filename }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Backend rejected call-end trigger: HTTP {}",
                response.status()
            ));
        }
        Ok(())
    }

    // ===== Auth =====

    pub async fn get_session(&self) -> Result<SessionInfo> {
        let response = self.http.get(self.api("/api/auth/session")).send().await?;
        if !response.status().is_success() {
            return Ok(SessionInfo::default());
        }
        Ok(response.json().await.unwrap_or_default())
    }

    pub async fn logout(&self) -> Result<()> {
        self.http.post(self.api("/api/auth/logout")).send().await?;
        Ok(())
    }

    // ===== Settings =====

    pub async fn fetch_settings(&self) -> Result<UserSettings> {
        let response = self.http.get(self.api("/api/settings")).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Failed to fetch settings: HTTP {}", response.status()));
        }
        Ok(response.json().await?)
    }

    pub async fn push_settings(&self, settings: &UserSettings) -> Result<()> {
        let response = self
            .http
            .post(self.api("/api/settings"))
            .json(settings)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Failed to save settings: HTTP {}", response.status()));
        }
        Ok(())
    }

    // ===== Streams =====

    /// `POST /api/upload` (multipart). The returned response body is an SSE
    /// stream of `PipelineEvent`s; the caller drives it.
    pub async fn upload_audio(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        language: Option<&str>,
        speakers: Option<u32>,
    ) -> Result<reqwest::Response> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(lang) = language.filter(|l| !l.is_empty() && *l != "auto") {
            form = form.text("language", lang.to_string());
        }
        if let Some(n) = speakers.filter(|n| *n > 0) {
            form = form.text("speakers", n.to_string());
        }

        let response = self
            .http
            .post(self.api("/api/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow!("Upload request failed: {}", e))?;
        Ok(response)
    }

    /// Open the persistent notification stream. The caller owns reconnects.
    pub async fn open_notification_stream(&self) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(self.api("/api/notifications/stream"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Notification stream refused: HTTP {}",
                response.status()
            ));
        }
        Ok(response)
    }
}
