use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use uuid::Uuid;

use crate::events::{UiBus, UiEvent};

/// How long a toast stays on screen before the pruner removes it.
pub const TOAST_TTL_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Warning,
    Info,
    Processing,
}

impl ToastKind {
    /// Default Font Awesome icon class for the kind; callers may override.
    pub fn default_icon(&self) -> &'static str {
        match self {
            ToastKind::Success => "fa-check",
            ToastKind::Error => "fa-triangle-exclamation",
            ToastKind::Warning => "fa-triangle-exclamation",
            ToastKind::Info => "fa-circle-info",
            ToastKind::Processing => "fa-spinner fa-spin",
        }
    }
}

/// One on-screen notification card.
#[derive(Debug, Clone)]
pub struct Toast {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: ToastKind,
    pub icon: String,
    pub created_at: DateTime<Utc>,
}

/// Holds the visible toasts and announces changes on the bus.
///
/// Every toast expires after `TOAST_TTL_SECS` unless dismissed first; the
/// engine runs `prune_expired` on a short interval.
pub struct ToastStore {
    toasts: Mutex<Vec<Toast>>,
    bus: UiBus,
    ttl: Duration,
}

impl ToastStore {
    pub fn new(bus: UiBus) -> Self {
        Self {
            toasts: Mutex::new(Vec::new()),
            bus,
            ttl: Duration::seconds(TOAST_TTL_SECS),
        }
    }

    pub fn push(&self, kind: ToastKind, title: &str, message: &str, icon: Option<&str>) -> Uuid {
        let toast = Toast {
            id: Uuid::new_v4(),
            title: title.to_string(),
            message: message.to_string(),
            kind,
            icon: icon.unwrap_or(kind.default_icon()).to_string(),
            created_at: Utc::now(),
        };
        let id = toast.id;
        self.toasts.lock().unwrap().push(toast.clone());
        self.bus.emit(UiEvent::ToastPushed(toast));
        id
    }

    /// Dismiss by id. Unknown ids are ignored.
    pub fn dismiss(&self, id: Uuid) {
        let mut toasts = self.toasts.lock().unwrap();
        let before = toasts.len();
        toasts.retain(|t| t.id != id);
        if toasts.len() != before {
            self.bus.emit(UiEvent::ToastDismissed(id));
        }
    }

    /// Drop every toast older than the TTL, announcing each removal.
    pub fn prune_expired(&self) {
        let cutoff = Utc::now() - self.ttl;
        let expired: Vec<Uuid> = {
            let mut toasts = self.toasts.lock().unwrap();
            let (gone, keep): (Vec<Toast>, Vec<Toast>) =
                toasts.drain(..).partition(|t| t.created_at < cutoff);
            *toasts = keep;
            gone.into_iter().map(|t| t.id).collect()
        };
        for id in expired {
            self.bus.emit(UiEvent::ToastDismissed(id));
        }
    }

    pub fn active(&self) -> Vec<Toast> {
        self.toasts.lock().unwrap().clone()
    }
}
