use chrono::{DateTime, Duration as Age, Utc};
use log::{info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::api::models::{ActiveCall, TranscriptRow};
use crate::api::ApiClient;
use crate::events::{UiBus, UiEvent};
use crate::notify::toast::{ToastKind, ToastStore};
use crate::realtime::{ChannelEvent, ChannelGuard, RealtimeClient};
use crate::sched::ScheduledTask;

/// A call that started or updated within this window pops the live view
/// open on its own.
pub const FRESHNESS_WINDOW_SECS: i64 = 15;

/// Delay between a call ending and the follow-up list refresh, giving the
/// backend time to register the recording.
const POST_END_REFRESH_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivePhase {
    Idle,
    LoadingHistory,
    Subscribing,
    Live,
}

/// Read-only view of the live transcript modal for rendering.
#[derive(Debug, Clone)]
pub struct LiveViewSnapshot {
    pub phase: LivePhase,
    pub call_id: Option<String>,
    pub rows: Vec<TranscriptRow>,
    pub connection_status: String,
}

struct Inner {
    phase: LivePhase,
    call_id: Option<String>,
    rows: Vec<TranscriptRow>,
    connection_status: String,
    guard: Option<ChannelGuard>,
    feed: Option<JoinHandle<()>>,
}

/// Fold a pushed transcript row into the view. Updates replace the row with
/// the same id in place; a row is never duplicated.
pub fn upsert_row(rows: &mut Vec<TranscriptRow>, incoming: TranscriptRow) {
    match rows.iter_mut().find(|r| r.id == incoming.id) {
        Some(existing) => *existing = incoming,
        None => rows.push(incoming),
    }
}

/// Plain-text rendering of the conversation, for the copy button.
pub fn compose_transcript(rows: &[TranscriptRow]) -> String {
    rows.iter()
        .map(|r| {
            let role = if r.is_user() { "User" } else { "Assistant" };
            format!("{}: {}", role, r.transcript)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// True when the call was touched recently enough to auto-open the view.
pub fn is_fresh(call: &ActiveCall, now: DateTime<Utc>) -> bool {
    call.is_live()
        && call
            .last_touched()
            .map(|t| now - t <= Age::seconds(FRESHNESS_WINDOW_SECS))
            .unwrap_or(false)
}

/// Drives the live transcript modal for one call at a time.
///
/// Opening loads the stored history first, then subscribes to the call's
/// transcript channel; opening a second call tears the first subscription
/// down before anything else, so at most one channel is ever held.
pub struct LiveViewManager {
    api: Arc<ApiClient>,
    realtime: Arc<RealtimeClient>,
    toasts: Arc<ToastStore>,
    bus: UiBus,
    inner: Mutex<Inner>,
    refresh_task: ScheduledTask,
}

impl LiveViewManager {
    pub fn new(
        api: Arc<ApiClient>,
        realtime: Arc<RealtimeClient>,
        toasts: Arc<ToastStore>,
        bus: UiBus,
    ) -> Self {
        Self {
            api,
            realtime,
            toasts,
            bus,
            inner: Mutex::new(Inner {
                phase: LivePhase::Idle,
                call_id: None,
                rows: Vec::new(),
                connection_status: String::new(),
                guard: None,
                feed: None,
            }),
            refresh_task: ScheduledTask::new(),
        }
    }

    /// Open the view for `call_id`: tear down any previous subscription,
    /// load history, then go live.
    pub async fn open(self: &Arc<Self>, call_id: &str) {
        self.teardown();

        {
            let mut inner = self.inner.lock().unwrap();
            inner.phase = LivePhase::LoadingHistory;
            inner.call_id = Some(call_id.to_string());
            inner.rows.clear();
            inner.connection_status = "Connecting...".to_string();
        }
        self.bus.emit(UiEvent::LiveViewOpened {
            call_id: call_id.to_string(),
        });
        self.set_connection_status("Connecting...");

        match self.api.get_transcript_history(call_id).await {
            Ok(history) => {
                let mut inner = self.inner.lock().unwrap();
                // The view may have been closed or retargeted while loading.
                if inner.call_id.as_deref() != Some(call_id) {
                    return;
                }
                inner.rows = history;
            }
            Err(e) => {
                warn!("[LiveView] History load failed for {}: {}", call_id, e);
                self.toasts.push(
                    ToastKind::Error,
                    "Transcript",
                    "Could not load transcript history",
                    None,
                );
            }
        }

        let (guard, mut rx) = self.realtime.subscribe(
            &format!("live-call-{}", call_id),
            "transcripts",
            Some(format!("call_id=eq.{}", call_id)),
        );
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.call_id.as_deref() != Some(call_id) {
                return;
            }
            inner.phase = LivePhase::Subscribing;
            inner.guard = Some(guard);
        }

        let mgr = self.clone();
        let id = call_id.to_string();
        let feed = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ChannelEvent::Joined => {
                        info!("[LiveView] Subscribed to call {}", id);
                        {
                            let mut inner = mgr.inner.lock().unwrap();
                            if inner.call_id.as_deref() != Some(id.as_str()) {
                                return;
                            }
                            inner.phase = LivePhase::Live;
                        }
                        mgr.set_connection_status("Live Connected");
                    }
                    ChannelEvent::Row(row) => mgr.handle_row(row.record),
                }
            }
        });
        self.inner.lock().unwrap().feed = Some(feed);
    }

    /// Fold one pushed transcript row into the open view.
    pub fn handle_row(&self, record: serde_json::Value) {
        let row: TranscriptRow = match serde_json::from_value(record) {
            Ok(r) => r,
            Err(e) => {
                warn!("[LiveView] Ignoring malformed transcript row: {}", e);
                return;
            }
        };

        let emitted = {
            let mut inner = self.inner.lock().unwrap();
            let open_id = inner.call_id.clone();
            match (open_id, row.call_id.clone()) {
                (Some(open), Some(rowid)) if open == rowid => {
                    let row_id = row.id;
                    upsert_row(&mut inner.rows, row);
                    Some((open, row_id))
                }
                _ => None,
            }
        };

        if let Some((call_id, row_id)) = emitted {
            self.bus.emit(UiEvent::LiveRowUpserted { call_id, row_id });
        }
    }

    /// Close the view. Idempotent.
    pub fn close(&self) {
        let was_open = self.inner.lock().unwrap().call_id.is_some();
        self.teardown();
        if was_open {
            self.bus.emit(UiEvent::LiveViewClosed);
        }
    }

    fn teardown(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(mut guard) = inner.guard.take() {
            guard.release();
        }
        if let Some(feed) = inner.feed.take() {
            feed.abort();
        }
        inner.phase = LivePhase::Idle;
        inner.call_id = None;
        inner.rows.clear();
        inner.connection_status.clear();
    }

    fn set_connection_status(&self, status: &str) {
        self.inner.lock().unwrap().connection_status = status.to_string();
        self.bus.emit(UiEvent::LiveConnectionChanged {
            status: status.to_string(),
        });
    }

    /// Auto-open for a freshly started call, unless a view is already open.
    pub async fn maybe_auto_open(self: &Arc<Self>, call: &ActiveCall) {
        if !is_fresh(call, Utc::now()) {
            return;
        }
        let Some(id) = call.call_id.clone() else {
            return;
        };
        if self.inner.lock().unwrap().call_id.is_some() {
            return;
        }
        info!("[LiveView] Auto-opening fresh call {}", id);
        self.open(&id).await;
    }

    /// Hand a finished call's recording to the analysis pipeline and
    /// schedule the follow-up list refresh.
    pub async fn handle_call_end(&self, recording_url: &str, filename: &str) {
        match self.api.trigger_vapi_call(recording_url, filename).await {
            Ok(()) => {
                self.toasts.push(
                    ToastKind::Info,
                    "Call Ended",
                    "Recording sent for analysis",
                    None,
                );
                let bus = self.bus.clone();
                self.refresh_task.restart(POST_END_REFRESH_DELAY, async move {
                    bus.emit(UiEvent::RefreshRequested);
                });
            }
            Err(e) => {
                warn!("[LiveView] Call-end trigger failed: {}", e);
                self.toasts.push(
                    ToastKind::Error,
                    "Call Ended",
                    "Could not queue the recording for analysis",
                    None,
                );
            }
        }
    }

    pub fn snapshot(&self) -> LiveViewSnapshot {
        let inner = self.inner.lock().unwrap();
        LiveViewSnapshot {
            phase: inner.phase,
            call_id: inner.call_id.clone(),
            rows: inner.rows.clone(),
            connection_status: inner.connection_status.clone(),
        }
    }

    /// Current conversation as plain text (copy button).
    pub fn transcript_text(&self) -> String {
        compose_transcript(&self.inner.lock().unwrap().rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, call_id: &str, role: &str, text: &str) -> TranscriptRow {
        TranscriptRow {
            id,
            call_id: Some(call_id.to_string()),
            role: Some(role.to_string()),
            transcript: text.to_string(),
            timestamp: None,
        }
    }

    #[test]
    fn test_upsert_updates_in_place_without_duplicating() {
        let mut rows = vec![row(1, "c", "user", "hel"), row(2, "c", "assistant", "hi")];

        upsert_row(&mut rows, row(1, "c", "user", "hello there"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].transcript, "hello there");

        upsert_row(&mut rows, row(3, "c", "user", "new"));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].id, 3);
    }

    #[test]
    fn test_compose_transcript_labels_roles() {
        let rows = vec![
            row(1, "c", "user", "My invoice is wrong."),
            row(2, "c", "assistant", "Let me check."),
        ];
        assert_eq!(
            compose_transcript(&rows),
            "User: My invoice is wrong.\n\nAssistant: Let me check."
        );
    }

    #[test]
    fn test_unknown_role_renders_as_assistant() {
        let mut r = row(1, "c", "bot", "hi");
        r.role = None;
        assert_eq!(compose_transcript(&[r]), "Assistant: hi");
    }

    #[test]
    fn test_freshness_window() {
        let now = Utc::now();
        let mut call = ActiveCall {
            call_id: Some("c".to_string()),
            status: "in-progress".to_string(),
            created_at: Some(now - Age::seconds(10)),
            updated_at: None,
        };
        assert!(is_fresh(&call, now));

        call.created_at = Some(now - Age::seconds(FRESHNESS_WINDOW_SECS + 5));
        assert!(!is_fresh(&call, now));

        call.status = "ended".to_string();
        call.created_at = Some(now);
        assert!(!is_fresh(&call, now));
    }

    fn manager() -> Arc<LiveViewManager> {
        let bus = UiBus::default();
        let api = Arc::new(ApiClient::new("http://localhost:0", "http://localhost:0", "k"));
        let realtime = Arc::new(RealtimeClient::connect("ws://127.0.0.1:1"));
        let toasts = Arc::new(ToastStore::new(bus.clone()));
        Arc::new(LiveViewManager::new(api, realtime, toasts, bus))
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_silent_when_idle() {
        let mgr = manager();
        let mut rx = mgr.bus.subscribe();

        mgr.close();
        mgr.close();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rows_for_other_calls_are_ignored() {
        let mgr = manager();
        {
            let mut inner = mgr.inner.lock().unwrap();
            inner.call_id = Some("open-call".to_string());
            inner.phase = LivePhase::Live;
        }

        mgr.handle_row(serde_json::json!({
            "id": 7, "call_id": "someone-else", "role": "user", "transcript": "hi"
        }));
        assert!(mgr.snapshot().rows.is_empty());

        mgr.handle_row(serde_json::json!({
            "id": 8, "call_id": "open-call", "role": "user", "transcript": "hi"
        }));
        assert_eq!(mgr.snapshot().rows.len(), 1);
    }

    #[tokio::test]
    async fn test_open_then_close_clears_state() {
        let mgr = manager();
        mgr.open("c1").await;
        assert_eq!(mgr.snapshot().call_id.as_deref(), Some("c1"));

        mgr.close();
        let snap = mgr.snapshot();
        assert_eq!(snap.phase, LivePhase::Idle);
        assert!(snap.call_id.is_none());
        assert!(snap.rows.is_empty());
    }
}
