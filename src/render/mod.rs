//! Pure projections from engine state to renderable view models.
//!
//! Nothing here mutates state or talks to the network: every function maps
//! the current state container to a value the attached front end can draw,
//! so re-rendering after an invalidation event is always safe and cheap.

use chrono::{DateTime, Utc};

use crate::api::models::{parse_structured_summary, ActiveCall, CallRecord, GlobalStats};
use crate::managers::call_list::{LiveCallsSnapshot, LiveListPhase};
use crate::managers::live_view::{LivePhase, LiveViewSnapshot};
use crate::settings::DateFormat;
use crate::state::DashboardState;

const SUMMARY_PREVIEW_CHARS: usize = 120;

// ===== Format helpers =====

/// "m:ss", or the placeholder when the duration is unknown.
pub fn format_duration(secs: Option<u64>) -> String {
    match secs {
        Some(s) => format!("{}:{:02}", s / 60, s % 60),
        None => "--:--".to_string(),
    }
}

/// Relative age of a timestamp, coarsest unit wins.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then);
    let secs = delta.num_seconds();
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}

/// Render a timestamp per the user's date-format setting.
pub fn format_date(when: Option<DateTime<Utc>>, format: DateFormat, now: DateTime<Utc>) -> String {
    let Some(when) = when else {
        return "Unknown".to_string();
    };
    match format {
        DateFormat::Relative => time_ago(when, now),
        DateFormat::Full => when.format("%A, %B %-d, %Y, %I:%M %p").to_string(),
        DateFormat::Short => when.format("%b %-d, %I:%M %p").to_string(),
    }
}

/// CSS class for a tag chip, grouped by topic keywords.
pub fn tag_class(tag: &str) -> &'static str {
    let lower = tag.to_lowercase();
    if lower.contains("bill") {
        "tag-billing"
    } else if lower.contains("support") || lower.contains("help") {
        "tag-support"
    } else if lower.contains("churn") || lower.contains("cancel") {
        "tag-churn"
    } else {
        "tag-default"
    }
}

/// Shortened call id for table rows; full ids are unwieldy. Ids are opaque
/// strings, so truncation counts characters, not bytes.
pub fn short_call_id(call_id: Option<&str>) -> String {
    match call_id {
        Some(id) if id.chars().count() > 8 => {
            let cut: String = id.chars().take(8).collect();
            format!("{}...", cut)
        }
        Some(id) => id.to_string(),
        None => "Unknown".to_string(),
    }
}

/// Badge class and icon for a sentiment value.
pub fn sentiment_badge(sentiment: &str) -> (&'static str, &'static str) {
    match sentiment {
        "positive" => ("sentiment-positive", "fa-face-smile"),
        "negative" => ("sentiment-negative", "fa-face-frown"),
        _ => ("sentiment-neutral", "fa-minus"),
    }
}

/// "Live" while running, else the capitalized raw status.
pub fn live_status_label(call: &ActiveCall) -> String {
    if call.is_live() {
        "Live".to_string()
    } else {
        let mut chars = call.status.chars();
        match chars.next() {
            Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
            None => "Unknown".to_string(),
        }
    }
}

fn summary_preview(summary: Option<&str>) -> String {
    let Some(raw) = summary else {
        return String::new();
    };
    let text = match parse_structured_summary(raw) {
        Some(structured) => structured.overview,
        None => raw.to_string(),
    };
    if text.chars().count() > SUMMARY_PREVIEW_CHARS {
        let cut: String = text.chars().take(SUMMARY_PREVIEW_CHARS).collect();
        format!("{}...", cut.trim_end())
    } else {
        text
    }
}

// ===== Call table =====

#[derive(Debug, Clone)]
pub struct CallRow {
    pub id: i64,
    pub filename: String,
    pub date: String,
    pub duration: String,
    pub sentiment_label: String,
    pub sentiment_class: &'static str,
    pub sentiment_icon: &'static str,
    /// (text, css class) per tag chip.
    pub tags: Vec<(String, &'static str)>,
    pub summary_preview: String,
}

#[derive(Debug, Clone)]
pub struct CallTableView {
    pub rows: Vec<CallRow>,
    /// "Showing X of Y calls" footer values.
    pub showing: usize,
    pub total: u64,
    pub has_more: bool,
    pub empty_message: Option<String>,
    pub error: Option<String>,
}

pub fn render_call_table(state: &DashboardState, now: DateTime<Utc>) -> CallTableView {
    let filtered = state.filtered_calls();
    let page_size = state.settings.page_size();
    let date_format = state.settings.date_format;

    let rows: Vec<CallRow> = filtered
        .iter()
        .take(page_size)
        .map(|call| render_call_row(call, date_format, now))
        .collect();

    let empty_message = if rows.is_empty() && state.fetch_error.is_none() {
        Some("No calls match your search criteria".to_string())
    } else {
        None
    };

    CallTableView {
        showing: rows.len(),
        rows,
        total: state.total_calls,
        has_more: state.has_more,
        empty_message,
        error: state.fetch_error.clone(),
    }
}

fn render_call_row(call: &CallRecord, date_format: DateFormat, now: DateTime<Utc>) -> CallRow {
    let sentiment = call.sentiment_lower();
    let (class, icon) = sentiment_badge(&sentiment);
    CallRow {
        id: call.id,
        filename: call
            .filename
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        date: format_date(call.created_at, date_format, now),
        duration: format_duration(call.duration),
        sentiment_label: sentiment,
        sentiment_class: class,
        sentiment_icon: icon,
        tags: call
            .tags
            .iter()
            .map(|t| (t.clone(), tag_class(t)))
            .collect(),
        summary_preview: summary_preview(call.summary.as_deref()),
    }
}

// ===== Live calls panel =====

#[derive(Debug, Clone)]
pub struct LiveCallRow {
    pub call_id: String,
    pub call_id_short: String,
    pub status_label: String,
    pub is_live: bool,
    pub started: String,
}

#[derive(Debug, Clone)]
pub struct LiveCallsView {
    pub loading: bool,
    pub rows: Vec<LiveCallRow>,
    pub empty_message: Option<String>,
    pub error: Option<String>,
}

pub fn render_live_calls(snapshot: &LiveCallsSnapshot, now: DateTime<Utc>) -> LiveCallsView {
    let (loading, error) = match &snapshot.phase {
        LiveListPhase::Loading => (true, None),
        LiveListPhase::Ready => (false, None),
        LiveListPhase::Error(msg) => (false, Some(msg.clone())),
    };

    let rows: Vec<LiveCallRow> = snapshot
        .calls
        .iter()
        .map(|call| LiveCallRow {
            call_id: call.call_id.clone().unwrap_or_default(),
            call_id_short: short_call_id(call.call_id.as_deref()),
            status_label: live_status_label(call),
            is_live: call.is_live(),
            started: call
                .created_at
                .map(|t| time_ago(t, now))
                .unwrap_or_else(|| "Unknown".to_string()),
        })
        .collect();

    let empty_message = if !loading && error.is_none() && rows.is_empty() {
        Some("No active calls found.".to_string())
    } else {
        None
    };

    LiveCallsView {
        loading,
        rows,
        empty_message,
        error,
    }
}

// ===== Live transcript modal =====

#[derive(Debug, Clone)]
pub struct TranscriptLine {
    pub role_label: &'static str,
    /// User bubbles sit on the right, assistant on the left.
    pub align_right: bool,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TranscriptView {
    pub open: bool,
    pub call_id_short: String,
    pub connection_status: String,
    pub loading: bool,
    pub lines: Vec<TranscriptLine>,
}

pub fn render_live_view(snapshot: &LiveViewSnapshot) -> TranscriptView {
    TranscriptView {
        open: snapshot.phase != LivePhase::Idle,
        call_id_short: short_call_id(snapshot.call_id.as_deref()),
        connection_status: snapshot.connection_status.clone(),
        loading: snapshot.phase == LivePhase::LoadingHistory,
        lines: snapshot
            .rows
            .iter()
            .map(|row| TranscriptLine {
                role_label: if row.is_user() { "User" } else { "Assistant" },
                align_right: row.is_user(),
                text: row.transcript.clone(),
            })
            .collect(),
    }
}

// ===== Stats panel =====

#[derive(Debug, Clone, Default)]
pub struct StatsView {
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
    pub total: u64,
    pub avg_duration: String,
    /// Tags with counts, most frequent first.
    pub top_tags: Vec<(String, u64)>,
}

pub fn render_stats(stats: Option<&GlobalStats>) -> StatsView {
    let Some(stats) = stats else {
        return StatsView {
            avg_duration: format_duration(None),
            ..Default::default()
        };
    };

    let mut top_tags: Vec<(String, u64)> = stats
        .tag_counts
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    top_tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let s = &stats.sentiment;
    StatsView {
        positive: s.positive,
        neutral: s.neutral,
        negative: s.negative,
        total: s.positive + s.neutral + s.negative,
        avg_duration: format_duration(Some(stats.avg_duration.round() as u64)),
        top_tags,
    }
}
