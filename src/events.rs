use crate::managers::upload::UploadItemStatus;
use crate::notify::toast::Toast;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events pushed from the engine to whatever front end is attached.
///
/// Invalidation events carry no data: the consumer re-runs the relevant
/// `render` function against current state, which keeps the rendered output a
/// pure projection of the state container.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// The call list or its filter projection changed; re-render the table.
    CallListInvalidated,
    /// Stats / chart feed changed.
    StatsInvalidated,
    /// The active (live) calls view changed.
    LiveCallsInvalidated,
    /// A transcript row was inserted or updated in the open live view.
    LiveRowUpserted { call_id: String, row_id: i64 },
    /// Live view connection indicator text changed (e.g. "Live Connected").
    LiveConnectionChanged { status: String },
    /// The live transcript modal was opened for a call.
    LiveViewOpened { call_id: String },
    /// The live transcript modal was closed.
    LiveViewClosed,
    /// A toast was pushed.
    ToastPushed(Toast),
    /// A toast was dismissed (by the user or by expiry).
    ToastDismissed(Uuid),
    /// Per-file status icon change in the upload modal.
    UploadItemStatus { index: usize, status: UploadItemStatus },
    /// Stage pipeline update for the file currently uploading.
    UploadStage {
        step: String,
        status: String,
        message: String,
        percent: Option<u8>,
    },
    /// Batch-level progress: processing file `current` of `total`.
    UploadBatchProgress {
        current: usize,
        total: usize,
        percent: u8,
    },
    /// The whole batch finished.
    UploadBatchFinished { success: usize, failed: usize },
    /// Request to close the upload modal (sent after an all-success batch).
    CloseUploadModal,
    /// Something asked for a full call-list refetch.
    RefreshRequested,
    /// The sentiment chart should be reinitialized from current stats.
    ChartRefreshRequested,
}

/// Broadcast bus connecting the engine to front-end subscribers.
///
/// Emitting never blocks and never fails: with no subscribers the event is
/// simply dropped, matching the at-most-once semantics of the original
/// notification pipeline.
#[derive(Clone)]
pub struct UiBus {
    tx: broadcast::Sender<UiEvent>,
}

impl UiBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }
}

impl Default for UiBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_a_noop() {
        let bus = UiBus::default();
        bus.emit(UiEvent::RefreshRequested);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = UiBus::default();
        let mut rx = bus.subscribe();
        bus.emit(UiEvent::RefreshRequested);
        bus.emit(UiEvent::ChartRefreshRequested);

        assert!(matches!(rx.recv().await.unwrap(), UiEvent::RefreshRequested));
        assert!(matches!(
            rx.recv().await.unwrap(),
            UiEvent::ChartRefreshRequested
        ));
    }
}
