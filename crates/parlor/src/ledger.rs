//! Append-only game ledger: one JSONL line per settled tournament or
//! duel, filed under `<dir>/YYYY/MM/DD.jsonl` (UTC).
//!
//! Writes happen on a background task fed by a bounded channel.
//! `try_append` never blocks game flow; if the writer is backlogged the
//! record is dropped with a warning.

use std::path::PathBuf;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub channel_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("data/ledger"),
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub v: u8,
    pub ts_unix_ms: u64,
    /// Session id hex; for duels, the challenge nonce in hex.
    pub session: String,
    pub mode: String,
    pub handle: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u64>,
    pub gold_delta: i64,
    pub xp_delta: i64,
}

#[derive(Clone)]
pub struct Ledger {
    tx: Option<mpsc::Sender<LedgerRecord>>,
}

impl Ledger {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn new(cfg: LedgerConfig) -> Self {
        if !cfg.enabled {
            return Self::disabled();
        }
        if let Err(e) = tokio::fs::create_dir_all(&cfg.dir).await {
            warn!(err = %e, dir = %cfg.dir.display(), "ledger mkdir failed; disabling");
            return Self::disabled();
        }
        let (tx, rx) = mpsc::channel::<LedgerRecord>(cfg.channel_capacity.max(16));
        tokio::spawn(writer_task(cfg, rx));
        Self { tx: Some(tx) }
    }

    pub fn try_append(&self, rec: LedgerRecord) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if tx.try_send(rec).is_err() {
            warn!("ledger backlogged; record dropped");
        }
    }
}

async fn writer_task(cfg: LedgerConfig, mut rx: mpsc::Receiver<LedgerRecord>) {
    let mut open: Option<(NaiveDate, tokio::fs::File)> = None;

    while let Some(rec) = rx.recv().await {
        let today = Utc::now().date_naive();
        if open.as_ref().map(|(d, _)| *d != today).unwrap_or(true) {
            match open_day_file(&cfg.dir, today).await {
                Ok(f) => open = Some((today, f)),
                Err(e) => {
                    warn!(err = %e, "ledger open failed; record dropped");
                    open = None;
                    continue;
                }
            }
        }
        let Some((_, file)) = open.as_mut() else {
            continue;
        };
        let mut line = match serde_json::to_vec(&rec) {
            Ok(v) => v,
            Err(e) => {
                warn!(err = %e, "ledger encode failed; record dropped");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = file.write_all(&line).await {
            warn!(err = %e, "ledger write failed; record dropped");
            open = None;
        }
    }
}

async fn open_day_file(dir: &std::path::Path, day: NaiveDate) -> std::io::Result<tokio::fs::File> {
    let parent = dir.join(format!("{:04}", day.year())).join(format!("{:02}", day.month()));
    tokio::fs::create_dir_all(&parent).await?;
    let path = parent.join(format!("{:02}.jsonl", day.day()));
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
}

pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
