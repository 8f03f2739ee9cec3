use anyhow::Result;
use chrono::{DateTime, Duration as Lookback, Utc};
use futures_util::future::BoxFuture;
use log::{info, warn};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::api::models::ActiveCall;
use crate::api::ApiClient;
use crate::events::{UiBus, UiEvent};
use crate::realtime::{ChannelEvent, ChannelGuard, RealtimeClient};
use crate::sched::ScheduledTask;
use crate::state::filters::FilterState;
use crate::state::{DashboardState, PAGE_SIZE};

/// Most recently created calls shown in the live panel.
const LIVE_CALLS_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum LiveListPhase {
    Loading,
    Ready,
    Error(String),
}

/// Read-only view of the live calls panel for rendering.
#[derive(Debug, Clone)]
pub struct LiveCallsSnapshot {
    pub phase: LiveListPhase,
    pub calls: Vec<ActiveCall>,
}

struct LiveListState {
    phase: LiveListPhase,
    calls: Vec<ActiveCall>,
}

/// True when a live-status row has gone quiet past the configured threshold.
pub fn is_stale(call: &ActiveCall, now: DateTime<Utc>, threshold: Lookback) -> bool {
    if !call.is_live() {
        return false;
    }
    match call.last_touched() {
        Some(touched) => now - touched > threshold,
        // Nothing to measure against; keep the row.
        None => false,
    }
}

/// Fold one pushed row into the live list. Returns whether anything changed.
///
/// Ended calls are removed (idempotently, so a replayed event is harmless);
/// stale live calls are dropped rather than shown; everything else is updated
/// in place or prepended as a new row.
pub fn apply_row(
    calls: &mut Vec<ActiveCall>,
    incoming: ActiveCall,
    now: DateTime<Utc>,
    threshold: Lookback,
) -> bool {
    let Some(id) = incoming.call_id.clone() else {
        return false;
    };
    let existing = calls
        .iter()
        .position(|c| c.call_id.as_deref() == Some(id.as_str()));

    if incoming.status == "ended" || is_stale(&incoming, now, threshold) {
        match existing {
            Some(pos) => {
                calls.remove(pos);
                true
            }
            None => false,
        }
    } else {
        match existing {
            Some(pos) => {
                calls[pos] = incoming;
                true
            }
            None => {
                calls.insert(0, incoming);
                true
            }
        }
    }
}

/// Owns the paged call list, the global stats and the live calls panel.
///
/// Realtime events keep the live panel current; the paged list refreshes on
/// demand and on the settings-driven auto-refresh timer. Rescheduling happens
/// after every fetch, including failed ones, so a transient backend outage
/// never kills the timer.
pub struct CallListManager {
    api: Arc<ApiClient>,
    state: Arc<Mutex<DashboardState>>,
    bus: UiBus,
    refresh_task: ScheduledTask,
    live: StdMutex<LiveListState>,
    subscription: StdMutex<Option<ChannelGuard>>,
    staleness: Lookback,
    lookback: Lookback,
}

impl CallListManager {
    pub fn new(
        api: Arc<ApiClient>,
        state: Arc<Mutex<DashboardState>>,
        bus: UiBus,
        staleness: Lookback,
        lookback: Lookback,
    ) -> Self {
        Self {
            api,
            state,
            bus,
            refresh_task: ScheduledTask::new(),
            live: StdMutex::new(LiveListState {
                phase: LiveListPhase::Loading,
                calls: Vec::new(),
            }),
            subscription: StdMutex::new(None),
            staleness,
            lookback,
        }
    }

    // ===== Paged call list =====

    /// Fetch one page. `append` pages forward from the current offset; a
    /// fresh fetch replaces the list and restarts the auto-refresh timer.
    pub async fn fetch_page(self: &Arc<Self>, append: bool) -> Result<()> {
        let (offset, refresh_secs) = {
            let state = self.state.lock().await;
            let offset = if append { state.offset } else { 0 };
            (offset, state.settings.auto_refresh_secs())
        };

        let result = self.api.get_calls(offset, PAGE_SIZE).await;
        let outcome = match result {
            Ok(page) => {
                let (calls, total, stats) = page.into_parts();
                let had_stats = stats.is_some();
                self.state
                    .lock()
                    .await
                    .absorb_page(calls, total, stats, append);
                self.bus.emit(UiEvent::CallListInvalidated);
                if had_stats {
                    self.bus.emit(UiEvent::StatsInvalidated);
                }
                Ok(())
            }
            Err(e) => {
                self.state.lock().await.fetch_error = Some(e.to_string());
                self.bus.emit(UiEvent::CallListInvalidated);
                Err(e)
            }
        };

        if !append {
            self.schedule_auto_refresh(refresh_secs);
        }
        outcome
    }

    fn refresh_boxed(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.fetch_page(false).await {
                warn!("[Calls] Auto-refresh failed: {}", e);
            }
        })
    }

    /// (Re)arm the auto-refresh timer. Zero seconds disables it.
    pub fn schedule_auto_refresh(self: &Arc<Self>, secs: u64) {
        if secs == 0 {
            self.refresh_task.cancel();
            return;
        }
        self.refresh_task
            .restart(Duration::from_secs(secs), self.clone().refresh_boxed());
    }

    pub async fn set_search(&self, term: &str) {
        self.state.lock().await.set_search_term(term);
        self.bus.emit(UiEvent::CallListInvalidated);
    }

    pub async fn set_filters(&self, filters: FilterState) {
        self.state.lock().await.filters = filters;
        self.bus.emit(UiEvent::CallListInvalidated);
    }

    pub async fn reset_filters(&self) {
        self.state.lock().await.filters.reset();
        self.bus.emit(UiEvent::CallListInvalidated);
    }

    // ===== Live calls panel =====

    /// Initial (or manual) fetch of the live panel from the status table.
    pub async fn fetch_live_calls(&self) {
        {
            let mut live = self.live.lock().unwrap();
            live.phase = LiveListPhase::Loading;
        }
        self.bus.emit(UiEvent::LiveCallsInvalidated);

        match self
            .api
            .get_active_calls(self.lookback, LIVE_CALLS_LIMIT)
            .await
        {
            Ok(calls) => self.set_active_calls(calls),
            Err(e) => {
                warn!("[Calls] Live calls fetch failed: {}", e);
                self.live.lock().unwrap().phase = LiveListPhase::Error(e.to_string());
                self.bus.emit(UiEvent::LiveCallsInvalidated);
            }
        }
    }

    /// Replace the live list, dropping ended and stale rows up front.
    pub fn set_active_calls(&self, calls: Vec<ActiveCall>) {
        let now = Utc::now();
        let kept: Vec<ActiveCall> = calls
            .into_iter()
            .filter(|c| c.status != "ended" && !is_stale(c, now, self.staleness))
            .collect();
        {
            let mut live = self.live.lock().unwrap();
            live.calls = kept;
            live.phase = LiveListPhase::Ready;
        }
        self.bus.emit(UiEvent::LiveCallsInvalidated);
    }

    /// Fold one pushed status row into the panel.
    pub fn handle_row(&self, record: serde_json::Value) {
        let call: ActiveCall = match serde_json::from_value(record) {
            Ok(c) => c,
            Err(e) => {
                warn!("[Calls] Ignoring malformed status row: {}", e);
                return;
            }
        };
        let changed = {
            let mut live = self.live.lock().unwrap();
            apply_row(&mut live.calls, call, Utc::now(), self.staleness)
        };
        if changed {
            self.bus.emit(UiEvent::LiveCallsInvalidated);
        }
    }

    /// Subscribe to the status table and feed pushed rows into the panel.
    pub fn start_subscription(self: &Arc<Self>, realtime: &RealtimeClient) {
        let (guard, mut rx) = realtime.subscribe("live-calls-list", "vapi_calls", None);
        *self.subscription.lock().unwrap() = Some(guard);

        let mgr = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ChannelEvent::Joined => info!("[Calls] Live calls subscription active"),
                    ChannelEvent::Row(row) => mgr.handle_row(row.record),
                }
            }
        });
    }

    pub fn stop_subscription(&self) {
        if let Some(mut guard) = self.subscription.lock().unwrap().take() {
            guard.release();
        }
    }

    pub fn live_snapshot(&self) -> LiveCallsSnapshot {
        let live = self.live.lock().unwrap();
        LiveCallsSnapshot {
            phase: live.phase.clone(),
            calls: live.calls.clone(),
        }
    }

    /// Rows currently considered live (used for the freshness auto-open).
    pub fn freshest_live_call(&self) -> Option<ActiveCall> {
        let live = self.live.lock().unwrap();
        live.calls.iter().find(|c| c.is_live()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, status: &str, minutes_ago: i64) -> ActiveCall {
        ActiveCall {
            call_id: Some(id.to_string()),
            status: status.to_string(),
            created_at: Some(Utc::now() - Lookback::minutes(minutes_ago)),
            updated_at: None,
        }
    }

    fn threshold() -> Lookback {
        Lookback::minutes(30)
    }

    #[test]
    fn test_stale_only_applies_to_live_calls() {
        let now = Utc::now();
        assert!(is_stale(&call("a", "in-progress", 45), now, threshold()));
        assert!(!is_stale(&call("a", "in-progress", 10), now, threshold()));
        // Non-live rows never count as stale, whatever their age.
        assert!(!is_stale(&call("a", "processing", 45), now, threshold()));
    }

    #[test]
    fn test_stale_prefers_updated_at() {
        let now = Utc::now();
        let mut c = call("a", "started", 45);
        c.updated_at = Some(now - Lookback::minutes(5));
        assert!(!is_stale(&c, now, threshold()));
    }

    #[test]
    fn test_ended_event_removes_row_idempotently() {
        let now = Utc::now();
        let mut calls = vec![call("a", "in-progress", 1)];

        assert!(apply_row(&mut calls, call("a", "ended", 0), now, threshold()));
        assert!(calls.is_empty());

        // Replayed event is a no-op.
        assert!(!apply_row(&mut calls, call("a", "ended", 0), now, threshold()));
    }

    #[test]
    fn test_update_replaces_in_place() {
        let now = Utc::now();
        let mut calls = vec![call("a", "started", 1), call("b", "started", 2)];

        assert!(apply_row(
            &mut calls,
            call("a", "in-progress", 0),
            now,
            threshold()
        ));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].status, "in-progress");
    }

    #[test]
    fn test_new_call_is_prepended() {
        let now = Utc::now();
        let mut calls = vec![call("a", "started", 5)];

        assert!(apply_row(&mut calls, call("b", "started", 0), now, threshold()));
        assert_eq!(calls[0].call_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_stale_event_drops_existing_row() {
        let now = Utc::now();
        let mut calls = vec![call("a", "in-progress", 1)];

        assert!(apply_row(
            &mut calls,
            call("a", "in-progress", 45),
            now,
            threshold()
        ));
        assert!(calls.is_empty());
    }

    #[test]
    fn test_row_without_call_id_is_ignored() {
        let now = Utc::now();
        let mut calls = vec![call("a", "started", 1)];
        let anon = ActiveCall {
            call_id: None,
            status: "started".to_string(),
            created_at: None,
            updated_at: None,
        };
        assert!(!apply_row(&mut calls, anon, now, threshold()));
        assert_eq!(calls.len(), 1);
    }

    fn manager() -> Arc<CallListManager> {
        let bus = UiBus::default();
        let api = Arc::new(ApiClient::new("http://localhost:0", "http://localhost:0", "k"));
        let state = Arc::new(Mutex::new(DashboardState::new(Default::default())));
        Arc::new(CallListManager::new(
            api,
            state,
            bus,
            threshold(),
            Lookback::hours(12),
        ))
    }

    #[tokio::test]
    async fn test_set_active_calls_filters_ended_and_stale() {
        let mgr = manager();
        mgr.set_active_calls(vec![
            call("live", "in-progress", 5),
            call("gone", "ended", 5),
            call("quiet", "started", 45),
            call("busy", "processing", 45),
        ]);

        let snapshot = mgr.live_snapshot();
        assert_eq!(snapshot.phase, LiveListPhase::Ready);
        let ids: Vec<&str> = snapshot
            .calls
            .iter()
            .filter_map(|c| c.call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["live", "busy"]);
    }

    #[tokio::test]
    async fn test_handle_row_only_emits_on_change() {
        let mgr = manager();
        mgr.set_active_calls(vec![]);

        let mut bus_rx = mgr.bus.subscribe();

        // Removing a row that is not there changes nothing.
        mgr.handle_row(serde_json::json!({ "call_id": "x", "status": "ended" }));
        assert!(bus_rx.try_recv().is_err());

        mgr.handle_row(serde_json::json!({ "call_id": "x", "status": "started" }));
        assert!(matches!(
            bus_rx.try_recv().unwrap(),
            UiEvent::LiveCallsInvalidated
        ));
    }
}
