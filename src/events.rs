//! Append-only audit events
//!
//! Sessions and enrollment report each stage through an [`EventSink`]. Sinks
//! may fail; [`emit`] logs the failure and carries on.

use crate::error::ReasonCode;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SessionStart,
    Liveness,
    FaceVote,
    FaceOutcome,
    Challenge,
    VoiceAttempt,
    Decision,
    Enrollment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub stage: Stage,
    pub outcome: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EventRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        session_id: &str,
        stage: Stage,
        outcome: ReasonCode,
    ) -> Self {
        Self {
            timestamp,
            session_id: session_id.to_string(),
            stage,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: &EventRecord) -> Result<()>;
}

/// Record an event; sink failures never reach the caller
pub fn emit(sink: &dyn EventSink, event: EventRecord) {
    if let Err(e) = sink.record(&event) {
        log::warn!(
            "Event sink rejected {:?}/{} for session {}: {:#}",
            event.stage,
            event.outcome,
            event.session_id,
            e
        );
    }
}

/// Writes events to the log at info level
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn record(&self, event: &EventRecord) -> Result<()> {
        log::info!(
            "[event] session={} stage={:?} outcome={}{}",
            event.session_id,
            event.stage,
            event.outcome,
            event
                .detail
                .as_deref()
                .map(|d| format!(" detail={}", d))
                .unwrap_or_default()
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a file
pub struct JsonlEventSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create event log directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set event log permissions")?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventSink {
    fn record(&self, event: &EventRecord) -> Result<()> {
        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Event log lock poisoned"))?;
        file.write_all(line.as_bytes())
            .context("Failed to append event")?;
        Ok(())
    }
}

/// Forwards events over a bounded crossbeam channel. A full or disconnected
/// channel is reported as a sink failure.
pub struct ChannelEventSink {
    tx: Sender<EventRecord>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, Receiver<EventRecord>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn record(&self, event: &EventRecord) -> Result<()> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!("Event channel full")),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("Event receiver dropped")),
        }
    }
}

#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _event: &EventRecord) -> Result<()> {
        Ok(())
    }
}
