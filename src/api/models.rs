use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One processed call as stored by the analytics backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: i64,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free text, or a JSON-encoded `StructuredSummary`.
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    /// Duration in seconds.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub speaker_count: Option<u32>,
    #[serde(default)]
    pub email_sent: Option<bool>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub diarization_data: Option<Vec<DiarizationChunk>>,
}

impl CallRecord {
    /// Sentiment normalized to lowercase, defaulting to neutral.
    pub fn sentiment_lower(&self) -> String {
        self.sentiment
            .as_deref()
            .unwrap_or("neutral")
            .to_lowercase()
    }
}

/// One utterance of a diarized transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiarizationChunk {
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    /// Human-assigned display name overriding the raw speaker id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Pre-edit text retained when the user rewrites an utterance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

/// Structured fields optionally JSON-encoded inside `CallRecord::summary`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StructuredSummary {
    pub overview: String,
    pub key_points: Vec<String>,
    pub caller_intent: String,
    pub issue_details: String,
    pub resolution: String,
    pub action_items: Vec<String>,
    pub tone: String,
}

/// Try to decode a summary string as structured JSON. Plain-text summaries
/// return None and are rendered as-is.
pub fn parse_structured_summary(summary: &str) -> Option<StructuredSummary> {
    let trimmed = summary.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SentimentCounts {
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
}

/// Aggregate stats the backend computes across all calls (not just the
/// fetched page).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GlobalStats {
    pub sentiment: SentimentCounts,
    pub avg_duration: f64,
    pub tag_counts: HashMap<String, u64>,
}

/// Response of `GET /api/calls`. Older deployments return a bare array;
/// current ones return the paged object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CallsPage {
    Paged {
        #[serde(default)]
        calls: Vec<CallRecord>,
        #[serde(default)]
        total: u64,
        #[serde(default)]
        stats: Option<GlobalStats>,
    },
    Legacy(Vec<CallRecord>),
}

impl CallsPage {
    /// Normalize both wire shapes into (calls, total, stats).
    pub fn into_parts(self) -> (Vec<CallRecord>, u64, Option<GlobalStats>) {
        match self {
            CallsPage::Paged {
                calls,
                total,
                stats,
            } => (calls, total, stats),
            CallsPage::Legacy(calls) => {
                let total = calls.len() as u64;
                (calls, total, None)
            }
        }
    }
}

/// A row of the live-status table (`vapi_calls`): one in-flight or recently
/// ended voice call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCall {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_status() -> String {
    "started".to_string()
}

impl ActiveCall {
    /// "Live" while the call is running, else the capitalized raw status.
    pub fn is_live(&self) -> bool {
        self.status == "in-progress" || self.status == "started"
    }

    /// Timestamp used for staleness checks: last update, falling back to
    /// creation time.
    pub fn last_touched(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

/// One transcribed utterance in the live view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRow {
    pub id: i64,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TranscriptRow {
    pub fn is_user(&self) -> bool {
        self.role.as_deref() == Some("user")
    }
}

/// Progress message pushed by the upload pipeline and the notification
/// stream alike: `{step, status, message}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineEvent {
    #[serde(default)]
    pub step: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionInfo {
    pub authenticated: bool,
    pub email: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranslateRequest {
    pub transcript: String,
    pub language: String,
    #[serde(default)]
    pub diarization_data: Vec<DiarizationChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TranslateResponse {
    pub success: bool,
    pub translated_text: Option<String>,
    pub translated_diarization: Option<Vec<DiarizationChunk>>,
    pub has_diarization: bool,
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paged_calls_response_parses() {
        let json = r#"{
            "calls": [{"id": 1, "filename": "a.mp3", "sentiment": "Positive", "tags": ["Support"]}],
            "total": 40,
            "stats": {
                "sentiment": {"positive": 10, "negative": 5, "neutral": 25},
                "avg_duration": 61.5,
                "tag_counts": {"Support": 12, "Billing": 3, "Technical": 1}
            }
        }"#;
        let page: CallsPage = serde_json::from_str(json).unwrap();
        let (calls, total, stats) = page.into_parts();
        assert_eq!(calls.len(), 1);
        assert_eq!(total, 40);
        let stats = stats.unwrap();
        assert_eq!(stats.sentiment.neutral, 25);
        assert_eq!(stats.tag_counts["Support"], 12);
    }

    #[test]
    fn test_legacy_bare_array_parses() {
        let json = r#"[{"id": 1}, {"id": 2}]"#;
        let page: CallsPage = serde_json::from_str(json).unwrap();
        let (calls, total, stats) = page.into_parts();
        assert_eq!(calls.len(), 2);
        assert_eq!(total, 2);
        assert!(stats.is_none());
    }

    #[test]
    fn test_sentiment_defaults_to_neutral() {
        let call: CallRecord = serde_json::from_str(r#"{"id": 3}"#).unwrap();
        assert_eq!(call.sentiment_lower(), "neutral");
    }

    #[test]
    fn test_structured_summary_detection() {
        let structured = r#"{"overview": "ok", "key_points": ["a"], "tone": "calm"}"#;
        let parsed = parse_structured_summary(structured).unwrap();
        assert_eq!(parsed.overview, "ok");
        assert_eq!(parsed.key_points, vec!["a"]);

        assert!(parse_structured_summary("Just a plain sentence.").is_none());
    }

    #[test]
    fn test_active_call_live_status() {
        let call = ActiveCall {
            call_id: Some("abc".into()),
            status: "in-progress".into(),
            created_at: None,
            updated_at: None,
        };
        assert!(call.is_live());

        let ended = ActiveCall {
            status: "ended".into(),
            ..call.clone()
        };
        assert!(!ended.is_live());
    }

    #[test]
    fn test_translate_request_wire_shape() {
        let req = TranslateRequest {
            transcript: "hi".to_string(),
            language: "fr".to_string(),
            diarization_data: vec![],
            call_id: None,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["language"], "fr");
        // Absent call_id stays off the wire entirely.
        assert!(v.get("call_id").is_none());

        let with_id = TranslateRequest {
            transcript: "hi".to_string(),
            language: "fr".to_string(),
            diarization_data: vec![],
            call_id: Some(9),
        };
        let v = serde_json::to_value(&with_id).unwrap();
        assert_eq!(v["call_id"], 9);
    }

    #[test]
    fn test_translate_response_tolerates_sparse_payload() {
        let resp: TranslateResponse = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(!resp.success);
        assert!(resp.translated_text.is_none());
        assert!(resp.translated_diarization.is_none());
    }

    #[test]
    fn test_pipeline_event_parses_with_missing_fields() {
        let evt: PipelineEvent = serde_json::from_str(r#"{"step": "upload"}"#).unwrap();
        assert_eq!(evt.step, "upload");
        assert_eq!(evt.status, "");
    }
}
