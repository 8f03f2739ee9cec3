use futures_util::StreamExt;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::api::models::PipelineEvent;
use crate::api::sse::SseLineBuffer;
use crate::api::ApiClient;
use crate::events::{UiBus, UiEvent};
use crate::notify::toast::{ToastKind, ToastStore};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// What one pipeline event should do to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
    pub icon: Option<&'static str>,
    /// True only for the terminal "done" event: the call list and the chart
    /// are refetched exactly once per finished call.
    pub refresh: bool,
}

/// Human label for a pipeline step name.
pub fn format_step(step: &str) -> String {
    match step {
        "start" => "Call Received".to_string(),
        "download" => "Downloading".to_string(),
        "upload" => "Google Drive".to_string(),
        "analyze" => "Analyzing".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        }
    }
}

/// Map a pipeline event to its toast and side effects. Pure.
pub fn route(event: &PipelineEvent) -> RouteOutcome {
    if event.status == "error" {
        return RouteOutcome {
            kind: ToastKind::Error,
            title: "Error".to_string(),
            message: event.message.clone(),
            icon: None,
            refresh: false,
        };
    }

    if event.step == "done" {
        return RouteOutcome {
            kind: ToastKind::Success,
            title: "Analysis Complete".to_string(),
            message: event.message.clone(),
            icon: None,
            refresh: true,
        };
    }

    if event.status == "success" || event.status == "complete" {
        let icon = if event.step == "upload" {
            Some("fa-google-drive")
        } else {
            None
        };
        return RouteOutcome {
            kind: ToastKind::Success,
            title: format_step(&event.step),
            message: event.message.clone(),
            icon,
            refresh: false,
        };
    }

    RouteOutcome {
        kind: ToastKind::Processing,
        title: format_step(&event.step),
        message: event.message.clone(),
        icon: None,
        refresh: false,
    }
}

/// Consumer of the server's persistent notification stream.
///
/// Calls processed outside the dashboard (phone calls, the drive forwarder)
/// surface here: each pipeline event becomes a toast, and the terminal event
/// triggers one list refresh and one chart refresh.
pub struct NotificationRelay {
    api: Arc<ApiClient>,
    toasts: Arc<ToastStore>,
    bus: UiBus,
}

impl NotificationRelay {
    pub fn new(api: Arc<ApiClient>, toasts: Arc<ToastStore>, bus: UiBus) -> Self {
        Self { api, toasts, bus }
    }

    fn apply(&self, event: &PipelineEvent) {
        let outcome = route(event);
        self.toasts
            .push(outcome.kind, &outcome.title, &outcome.message, outcome.icon);
        if outcome.refresh {
            self.bus.emit(UiEvent::RefreshRequested);
            self.bus.emit(UiEvent::ChartRefreshRequested);
        }
    }

    /// Consume the stream forever, reconnecting after failures.
    pub async fn run(self) {
        loop {
            match self.api.open_notification_stream().await {
                Ok(response) => {
                    info!("[Notify] Notification stream connected");
                    let mut stream = response.bytes_stream();
                    let mut lines = SseLineBuffer::new();
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(bytes) => {
                                for payload in lines.push(&bytes) {
                                    match serde_json::from_str::<PipelineEvent>(&payload) {
                                        Ok(event) => self.apply(&event),
                                        Err(e) => {
                                            warn!("[Notify] Skipping bad payload: {}", e)
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("[Notify] Stream read failed: {}", e);
                                break;
                            }
                        }
                    }
                    warn!("[Notify] Notification stream ended; reconnecting");
                }
                Err(e) => {
                    warn!("[Notify] Could not open notification stream: {}", e);
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(step: &str, status: &str, message: &str) -> PipelineEvent {
        PipelineEvent {
            step: step.to_string(),
            status: status.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_step_labels() {
        assert_eq!(format_step("start"), "Call Received");
        assert_eq!(format_step("download"), "Downloading");
        assert_eq!(format_step("upload"), "Google Drive");
        assert_eq!(format_step("analyze"), "Analyzing");
        assert_eq!(format_step("transcribe"), "Transcribe");
    }

    #[test]
    fn test_error_routes_to_error_toast() {
        let out = route(&event("analyze", "error", "model unavailable"));
        assert_eq!(out.kind, ToastKind::Error);
        assert_eq!(out.title, "Error");
        assert!(!out.refresh);
    }

    #[test]
    fn test_done_triggers_exactly_one_refresh() {
        let out = route(&event("done", "success", "Call analyzed"));
        assert_eq!(out.kind, ToastKind::Success);
        assert_eq!(out.title, "Analysis Complete");
        assert!(out.refresh);
    }

    #[test]
    fn test_upload_success_gets_drive_icon() {
        let out = route(&event("upload", "success", "Saved to Drive"));
        assert_eq!(out.icon, Some("fa-google-drive"));
        assert_eq!(out.title, "Google Drive");
        assert!(!out.refresh);
    }

    #[test]
    fn test_in_progress_routes_to_processing() {
        let out = route(&event("download", "active", "Fetching recording"));
        assert_eq!(out.kind, ToastKind::Processing);
        assert_eq!(out.title, "Downloading");
    }
}
