use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::models::PipelineEvent;
use crate::api::sse::SseLineBuffer;
use crate::api::ApiClient;
use crate::events::{UiBus, UiEvent};
use crate::notify::toast::{ToastKind, ToastStore};
use crate::sched::ScheduledTask;

/// Audio formats the backend pipeline accepts.
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["wav", "mp3", "m4a", "ogg", "webm", "flac", "aac"];

/// The pipeline stages shown for the file currently uploading, in order.
const STAGE_ORDER: [&str; 4] = ["upload", "transcribe", "analyze", "save"];

/// Pause between files so per-file progress stays readable.
const INTER_FILE_DELAY: Duration = Duration::from_millis(500);

/// Delay before an all-success batch closes the modal on its own.
const AUTO_CLOSE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadItemStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

/// One file queued in the upload modal.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub name: String,
    pub size: u64,
    pub path: PathBuf,
    pub status: UploadItemStatus,
}

/// Options applied to every file in a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Transcription language hint; None or "auto" lets the backend detect.
    pub language: Option<String>,
    /// Expected speaker count; None or 0 lets the backend guess.
    pub speakers: Option<u32>,
}

/// Stage-bar percentage for a pipeline event, if the step is one of the
/// four rendered stages.
pub fn stage_percent(step: &str, status: &str) -> Option<u8> {
    let idx = STAGE_ORDER.iter().position(|s| *s == step)? as u32;
    let base = idx * 100 / STAGE_ORDER.len() as u32;
    let pct = match status {
        "complete" | "success" => (idx + 1) * 100 / STAGE_ORDER.len() as u32,
        "active" => base + 5,
        _ => base,
    };
    Some(pct as u8)
}

fn has_allowed_extension(name: &str) -> bool {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

/// Duplicate check: the modal keys files by (name, size).
fn is_duplicate(items: &[UploadItem], name: &str, size: u64) -> bool {
    items.iter().any(|i| i.name == name && i.size == size)
}

/// Drives the batch upload modal: file queue, sequential processing and the
/// per-file stage pipeline.
pub struct UploadManager {
    api: Arc<ApiClient>,
    toasts: Arc<ToastStore>,
    bus: UiBus,
    items: Mutex<Vec<UploadItem>>,
    running: AtomicBool,
    close_task: ScheduledTask,
}

impl UploadManager {
    pub fn new(api: Arc<ApiClient>, toasts: Arc<ToastStore>, bus: UiBus) -> Self {
        Self {
            api,
            toasts,
            bus,
            items: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            close_task: ScheduledTask::new(),
        }
    }

    pub fn items(&self) -> Vec<UploadItem> {
        self.items.lock().unwrap().clone()
    }

    /// Add files to the queue. Unsupported types get a warning toast;
    /// duplicates (same name and size) are skipped.
    pub async fn add_files(&self, paths: Vec<PathBuf>) {
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if !has_allowed_extension(&name) {
                self.toasts.push(
                    ToastKind::Warning,
                    "Unsupported File",
                    &format!("{} is not a supported audio format", name),
                    None,
                );
                continue;
            }

            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    self.toasts.push(
                        ToastKind::Error,
                        "File Error",
                        &format!("Could not read {}: {}", name, e),
                        None,
                    );
                    continue;
                }
            };

            let mut items = self.items.lock().unwrap();
            if is_duplicate(&items, &name, size) {
                debug!("[Upload] Skipping duplicate file {}", name);
                continue;
            }
            items.push(UploadItem {
                name,
                size,
                path,
                status: UploadItemStatus::Pending,
            });
        }
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }

    pub fn remove(&self, index: usize) {
        let mut items = self.items.lock().unwrap();
        if index < items.len() {
            items.remove(index);
        }
    }

    fn set_status(&self, index: usize, status: UploadItemStatus) {
        if let Some(item) = self.items.lock().unwrap().get_mut(index) {
            item.status = status;
        }
        self.bus.emit(UiEvent::UploadItemStatus { index, status });
    }

    /// Upload every queued file, one at a time, in queue order.
    ///
    /// A failed file never stops the batch. When every file succeeds, the
    /// modal is scheduled to close itself and a list refresh is requested.
    pub async fn run_batch(self: &Arc<Self>, options: BatchOptions) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("an upload batch is already running"));
        }

        let queued = self.items();
        let total = queued.len();
        let mut success = 0usize;
        let mut failed = 0usize;

        for (i, item) in queued.iter().enumerate() {
            self.bus.emit(UiEvent::UploadBatchProgress {
                current: i + 1,
                total,
                percent: (i * 100 / total.max(1)) as u8,
            });

            if self.process_single(i, item, &options).await {
                success += 1;
            } else {
                failed += 1;
            }

            if i + 1 < total {
                tokio::time::sleep(INTER_FILE_DELAY).await;
            }
        }

        self.bus.emit(UiEvent::UploadBatchProgress {
            current: total,
            total,
            percent: 100,
        });
        self.bus.emit(UiEvent::UploadBatchFinished { success, failed });
        info!("[Upload] Batch finished: {} ok, {} failed", success, failed);

        if failed == 0 && total > 0 {
            self.toasts.push(
                ToastKind::Success,
                "Upload Complete",
                &format!("{} file(s) processed", success),
                None,
            );
            let bus = self.bus.clone();
            self.close_task.restart(AUTO_CLOSE_DELAY, async move {
                bus.emit(UiEvent::CloseUploadModal);
                bus.emit(UiEvent::RefreshRequested);
                bus.emit(UiEvent::ChartRefreshRequested);
            });
        } else if failed > 0 {
            self.toasts.push(
                ToastKind::Warning,
                "Upload Finished",
                &format!("{} succeeded, {} failed", success, failed),
                None,
            );
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Upload one file and drive its pipeline stream. Returns success.
    async fn process_single(&self, index: usize, item: &UploadItem, options: &BatchOptions) -> bool {
        self.set_status(index, UploadItemStatus::Processing);

        let bytes = match tokio::fs::read(&item.path).await {
            Ok(b) => b,
            Err(e) => {
                warn!("[Upload] Could not read {}: {}", item.name, e);
                self.fail(index, &item.name, &format!("Could not read file: {}", e));
                return false;
            }
        };

        let response = match self
            .api
            .upload_audio(&item.name, bytes, options.language.as_deref(), options.speakers)
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                self.fail(index, &item.name, &format!("Upload rejected: HTTP {}", r.status()));
                return false;
            }
            Err(e) => {
                self.fail(index, &item.name, &format!("Upload failed: {}", e));
                return false;
            }
        };

        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::new();
        let mut done = false;

        'read: while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    warn!("[Upload] Pipeline stream broke for {}: {}", item.name, e);
                    break;
                }
            };
            for payload in lines.push(&bytes) {
                let event: PipelineEvent = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        debug!("[Upload] Skipping bad pipeline payload: {}", e);
                        continue;
                    }
                };

                if event.status == "error" {
                    self.bus.emit(UiEvent::UploadStage {
                        step: event.step.clone(),
                        status: event.status.clone(),
                        message: event.message.clone(),
                        percent: stage_percent(&event.step, &event.status),
                    });
                    self.fail(index, &item.name, &event.message);
                    return false;
                }

                self.bus.emit(UiEvent::UploadStage {
                    step: event.step.clone(),
                    status: event.status.clone(),
                    message: event.message.clone(),
                    percent: stage_percent(&event.step, &event.status),
                });

                // Only done+success terminates the file successfully; a
                // "done" with any other status falls through to the
                // ended-without-completion failure below.
                if event.step == "done" && event.status == "success" {
                    done = true;
                    break 'read;
                }
            }
        }

        if done {
            self.set_status(index, UploadItemStatus::Complete);
            true
        } else {
            warn!("[Upload] Stream for {} ended without completion", item.name);
            self.fail(index, &item.name, "Processing ended unexpectedly");
            false
        }
    }

    fn fail(&self, index: usize, name: &str, message: &str) {
        self.set_status(index, UploadItemStatus::Error);
        self.toasts
            .push(ToastKind::Error, &format!("Failed: {}", name), message, None);
    }
}
