//! Watches a cloud-drive synced folder and forwards new recordings to the
//! analysis pipeline.
//!
//! Every poll cycle picks up audio files modified since the last cycle and
//! POSTs them to the upload endpoint, oldest first. The last-checked
//! timestamp persists next to the watched folder, so a restart never
//! re-uploads old recordings.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use voxwatch_lib::api::models::PipelineEvent;
use voxwatch_lib::api::sse::SseLineBuffer;
use voxwatch_lib::managers::upload::ALLOWED_EXTENSIONS;

const POLL_INTERVAL: Duration = Duration::from_secs(60);
const STATE_FILE: &str = ".last-forwarded";

struct Forwarder {
    http: reqwest::Client,
    api_base: String,
    watch_dir: PathBuf,
    state_path: PathBuf,
}

impl Forwarder {
    fn new(api_base: String, watch_dir: PathBuf) -> Self {
        let state_path = watch_dir.join(STATE_FILE);
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            watch_dir,
            state_path,
        }
    }

    /// Last successful scan time. A missing or corrupt state file starts the
    /// watch from now, so a fresh install never floods the pipeline with
    /// every old recording in the folder.
    async fn load_last_checked(&self) -> DateTime<Utc> {
        match tokio::fs::read_to_string(&self.state_path).await {
            Ok(raw) => match raw.trim().parse::<DateTime<Utc>>() {
                Ok(t) => t,
                Err(e) => {
                    warn!("Ignoring corrupt state file: {}", e);
                    Utc::now()
                }
            },
            Err(_) => Utc::now(),
        }
    }

    async fn save_last_checked(&self, when: DateTime<Utc>) -> Result<()> {
        tokio::fs::write(&self.state_path, when.to_rfc3339())
            .await
            .with_context(|| format!("writing {:?}", self.state_path))?;
        Ok(())
    }

    /// Audio files modified after `since`, oldest first.
    async fn scan(&self, since: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        let mut found: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.watch_dir)
            .await
            .with_context(|| format!("reading {:?}", self.watch_dir))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_audio_file(&path) {
                continue;
            }
            let meta = entry.metadata().await?;
            let modified: DateTime<Utc> = meta.modified()?.into();
            if modified > since {
                found.push((modified, path));
            }
        }

        found.sort_by_key(|(modified, _)| *modified);
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Upload one file and drive its pipeline stream to completion.
    async fn forward(&self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("file has no name: {:?}", path))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {:?}", path))?;

        info!("Forwarding {} ({} bytes)", name, bytes.len());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.clone());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/api/upload", self.api_base))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("upload rejected: HTTP {}", response.status()));
        }

        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::new();
        while let Some(chunk) = stream.next().await {
            for payload in lines.push(&chunk?) {
                let Ok(event) = serde_json::from_str::<PipelineEvent>(&payload) else {
                    continue;
                };
                if event.status == "error" {
                    return Err(anyhow!("pipeline failed at {}: {}", event.step, event.message));
                }
                if event.step == "done" && event.status == "success" {
                    info!("Processed {}", name);
                    return Ok(());
                }
            }
        }
        Err(anyhow!("pipeline stream for {} ended early", name))
    }

    async fn run(&self) {
        let mut last_checked = self.load_last_checked().await;
        let mut tick = tokio::time::interval(POLL_INTERVAL);

        loop {
            tick.tick().await;
            let cycle_start = Utc::now();

            let files = match self.scan(last_checked).await {
                Ok(files) => files,
                Err(e) => {
                    error!("Scan failed: {}", e);
                    continue;
                }
            };

            let mut all_ok = true;
            for path in &files {
                if let Err(e) = self.forward(path).await {
                    error!("Could not forward {:?}: {}", path, e);
                    all_ok = false;
                }
            }

            // Failed files stay eligible for the next cycle.
            if all_ok {
                last_checked = cycle_start;
                if let Err(e) = self.save_last_checked(last_checked).await {
                    warn!("Could not persist state: {}", e);
                }
            }
        }
    }
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let api_base =
        std::env::var("VOXWATCH_API_BASE").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let watch_dir = match std::env::var("VOXWATCH_WATCH_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            error!("VOXWATCH_WATCH_DIR must point at the synced recordings folder");
            std::process::exit(1);
        }
    };
    if !watch_dir.is_dir() {
        error!("{:?} is not a directory", watch_dir);
        std::process::exit(1);
    }

    info!("Watching {:?}, forwarding to {}", watch_dir, api_base);
    Forwarder::new(api_base, watch_dir).run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_audio_file_detection() {
        assert!(is_audio_file(Path::new("/x/call.mp3")));
        assert!(is_audio_file(Path::new("/x/CALL.WAV")));
        assert!(!is_audio_file(Path::new("/x/notes.txt")));
        assert!(!is_audio_file(Path::new("/x/.last-forwarded")));
    }

    #[tokio::test]
    async fn test_scan_picks_up_only_new_audio() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let fwd = Forwarder::new("http://localhost:0".to_string(), dir.path().to_path_buf());

        // Everything present predates a cutoff in the future.
        let none = fwd.scan(Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        assert!(none.is_empty());

        let all = fwd.scan(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].ends_with("old.mp3"));
    }

    #[tokio::test]
    async fn test_state_round_trip_and_corrupt_fallback() {
        let dir = TempDir::new().unwrap();
        let fwd = Forwarder::new("http://localhost:0".to_string(), dir.path().to_path_buf());

        let stamp = "2026-08-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        fwd.save_last_checked(stamp).await.unwrap();
        assert_eq!(fwd.load_last_checked().await, stamp);

        std::fs::write(dir.path().join(STATE_FILE), "garbage").unwrap();
        // Corrupt state restarts the watch from roughly now.
        let loaded = fwd.load_last_checked().await;
        assert!(Utc::now() - loaded < chrono::Duration::seconds(5));
    }
}
