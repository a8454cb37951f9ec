use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::operation::{GenerationPhase, OperationKind};
use crate::photo::PhotoSlot;
use crate::quota::QuotaLedger;

/// Everything the studio writes to its session log. The variant name,
/// snake_cased, is the row's `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StudioEvent {
    SessionStarted {
        quota: QuotaLedger,
        history_len: usize,
    },
    PhotoSelected {
        slot: PhotoSlot,
        mime_type: String,
    },
    PhotoRejected {
        slot: PhotoSlot,
        path: String,
    },
    #[serde(rename = "generation_phase")]
    PhaseEntered {
        operation: OperationKind,
        phase: GenerationPhase,
    },
    OperationRejected {
        kind: String,
        message: String,
    },
    OperationFailed {
        kind: String,
        message: String,
        status: Option<u16>,
    },
    WatermarkFallback {
        reason: String,
    },
    GenerationCommitted {
        quota: QuotaLedger,
        history_len: usize,
        watermarked: bool,
    },
    AdviceReady {
        operation: OperationKind,
        chars: usize,
    },
    CodeRedeemed {
        accepted: bool,
        quota: QuotaLedger,
    },
    HistoryExported {
        count: usize,
    },
    HistoryCleared {
        entries: usize,
    },
    StatePersistFailed {
        error: String,
    },
    AnimationUnavailable {
        error: String,
    },
    SessionReset,
}

/// Append-only JSONL log of one studio session.
///
/// Each row is the serialized [`StudioEvent`] plus `session_id` and an RFC
/// 3339 `ts`. Clones share the open file, so rows from every handle land in
/// call order.
#[derive(Debug, Clone)]
pub struct SessionLog {
    inner: Arc<SessionLogInner>,
}

#[derive(Debug)]
struct SessionLogInner {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionLogInner {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    /// Log with a freshly minted v4 session id.
    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Appends `event` and returns the row as written.
    pub fn record(&self, event: &StudioEvent) -> anyhow::Result<Value> {
        let mut row = match serde_json::to_value(event)? {
            Value::Object(fields) => fields,
            other => bail!("studio event serialized to a non-object: {other}"),
        };
        row.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        row.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        let mut line = serde_json::to_string(&row)?;
        line.push('\n');

        let mut file = self
            .inner
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("session log lock poisoned"))?;
        if file.is_none() {
            *file = Some(open_for_append(&self.inner.path)?);
        }
        if let Some(file) = file.as_mut() {
            file.write_all(line.as_bytes())?;
        }
        Ok(Value::Object(row))
    }

    /// Every recorded `type` in file order. Unparseable lines are skipped and
    /// a log that was never written reads as empty.
    pub fn recorded_types(&self) -> anyhow::Result<Vec<String>> {
        let raw = match std::fs::read_to_string(&self.inner.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

fn open_for_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
