use chrono::Duration as Window;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;

use crate::api::ApiClient;
use crate::error::EngineError;
use crate::events::{UiBus, UiEvent};
use crate::managers::call_list::CallListManager;
use crate::managers::live_view::LiveViewManager;
use crate::managers::upload::UploadManager;
use crate::notify::relay::NotificationRelay;
use crate::notify::toast::ToastStore;
use crate::realtime::RealtimeClient;
use crate::settings::{self, UserSettings};
use crate::state::DashboardState;

/// Engine wiring configuration. Endpoints come from the environment in the
/// binary; tests construct this directly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_base: String,
    pub db_base: String,
    pub db_key: String,
    pub realtime_url: String,
    /// Live calls quieter than this are treated as dead and hidden.
    pub staleness: Window,
    /// How far back the live panel looks for candidate calls.
    pub lookback: Window,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            db_base: "http://localhost:8000".to_string(),
            db_key: String::new(),
            realtime_url: "ws://localhost:8000/realtime".to_string(),
            staleness: Window::minutes(30),
            lookback: Window::hours(12),
        }
    }
}

impl EngineConfig {
    /// Read endpoints from `VOXWATCH_*` variables, defaulting the rest.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("VOXWATCH_API_BASE") {
            config.api_base = v;
        }
        if let Ok(v) = std::env::var("VOXWATCH_DB_BASE") {
            config.db_base = v;
        }
        if let Ok(v) = std::env::var("VOXWATCH_DB_KEY") {
            config.db_key = v;
        }
        if let Ok(v) = std::env::var("VOXWATCH_REALTIME_URL") {
            config.realtime_url = v;
        }
        if let Ok(v) = std::env::var("VOXWATCH_STALE_MINUTES") {
            if let Ok(mins) = v.parse::<i64>() {
                config.staleness = Window::minutes(mins);
            }
        }
        config
    }
}

/// Top-level assembly: one state container, one event bus, and the managers
/// that mutate the state between them.
pub struct Engine {
    pub bus: UiBus,
    pub state: Arc<Mutex<DashboardState>>,
    pub api: Arc<ApiClient>,
    pub realtime: Arc<RealtimeClient>,
    pub toasts: Arc<ToastStore>,
    pub calls: Arc<CallListManager>,
    pub live_view: Arc<LiveViewManager>,
    pub uploads: Arc<UploadManager>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let bus = UiBus::default();
        let api = Arc::new(ApiClient::new(
            config.api_base,
            config.db_base,
            config.db_key,
        ));
        let realtime = Arc::new(RealtimeClient::connect(config.realtime_url));
        let toasts = Arc::new(ToastStore::new(bus.clone()));
        let state = Arc::new(Mutex::new(DashboardState::new(settings::load_settings())));

        let calls = Arc::new(CallListManager::new(
            api.clone(),
            state.clone(),
            bus.clone(),
            config.staleness,
            config.lookback,
        ));
        let live_view = Arc::new(LiveViewManager::new(
            api.clone(),
            realtime.clone(),
            toasts.clone(),
            bus.clone(),
        ));
        let uploads = Arc::new(UploadManager::new(api.clone(), toasts.clone(), bus.clone()));

        Self {
            bus,
            state,
            api,
            realtime,
            toasts,
            calls,
            live_view,
            uploads,
        }
    }

    /// Bring the engine up: gate on the session, sync settings, run the
    /// initial fetches and start the background tasks.
    pub async fn start(&self) -> Result<(), EngineError> {
        let session = self.api.get_session().await?;
        if !session.authenticated {
            return Err(EngineError::AuthRequired);
        }
        info!(
            "[Engine] Session ok for {}",
            session.email.as_deref().unwrap_or("unknown user")
        );

        // Server-side settings win over the local copy when available.
        match self.api.fetch_settings().await {
            Ok(remote) => {
                self.state.lock().await.settings = remote.clone();
                if let Err(e) = settings::save_settings(&remote) {
                    warn!("[Engine] Could not persist settings locally: {}", e);
                }
            }
            Err(e) => warn!("[Engine] Using local settings, server fetch failed: {}", e),
        }

        if let Err(e) = self.calls.fetch_page(false).await {
            warn!("[Engine] Initial call fetch failed: {}", e);
        }
        self.calls.fetch_live_calls().await;
        self.calls.start_subscription(&self.realtime);

        tokio::spawn(
            NotificationRelay::new(self.api.clone(), self.toasts.clone(), self.bus.clone()).run(),
        );
        self.spawn_toast_pruner();
        self.spawn_router();

        Ok(())
    }

    /// Apply new settings everywhere: state, server, local disk, timers.
    pub async fn update_settings(&self, new: UserSettings) {
        let refresh_secs = new.auto_refresh_secs();
        self.state.lock().await.settings = new.clone();

        if let Err(e) = self.api.push_settings(&new).await {
            warn!("[Engine] Could not push settings to server: {}", e);
        }
        if let Err(e) = settings::save_settings(&new) {
            warn!("[Engine] Could not persist settings locally: {}", e);
        }

        self.calls.schedule_auto_refresh(refresh_secs);
        self.bus.emit(UiEvent::CallListInvalidated);
    }

    fn spawn_toast_pruner(&self) {
        let toasts = self.toasts.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                toasts.prune_expired();
            }
        });
    }

    /// React to bus events that feed back into the engine: refresh requests
    /// and live-panel changes that may auto-open the transcript view.
    fn spawn_router(&self) {
        let mut rx = self.bus.subscribe();
        let bus = self.bus.clone();
        let calls = self.calls.clone();
        let live_view = self.live_view.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(UiEvent::RefreshRequested) => {
                        if let Err(e) = calls.fetch_page(false).await {
                            warn!("[Engine] Requested refresh failed: {}", e);
                        }
                    }
                    Ok(UiEvent::ChartRefreshRequested) => {
                        // Stats arrive with the call list; the chart just
                        // needs to re-read them.
                        bus.emit(UiEvent::StatsInvalidated);
                    }
                    Ok(UiEvent::LiveCallsInvalidated) => {
                        if let Some(call) = calls.freshest_live_call() {
                            live_view.maybe_auto_open(&call).await;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("[Engine] Router lagged, skipped {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Release subscriptions and stop timers ahead of shutdown.
    pub fn shutdown(&self) {
        self.calls.stop_subscription();
        self.live_view.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.staleness, Window::minutes(30));
        assert_eq!(config.lookback, Window::hours(12));
    }

    #[tokio::test]
    async fn test_engine_assembles_without_network() {
        let engine = Engine::new(EngineConfig::default());
        assert!(engine.state.lock().await.calls.is_empty());
        assert!(engine.toasts.active().is_empty());
    }

    #[tokio::test]
    async fn test_chart_refresh_routes_to_stats_invalidation() {
        let engine = Engine::new(EngineConfig::default());
        engine.spawn_router();
        let mut rx = engine.bus.subscribe();

        engine.bus.emit(UiEvent::ChartRefreshRequested);

        // The router echoes the request as a stats invalidation.
        loop {
            match rx.recv().await.unwrap() {
                UiEvent::StatsInvalidated => break,
                UiEvent::ChartRefreshRequested => continue,
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
