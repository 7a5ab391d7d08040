use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Stages of a job that are recorded in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    JobStarted,
    AssetResolved,
    GenerationStarted,
    GenerationFinished,
    UploadFinished,
    JobFinished,
    JobFailed,
}

impl JobEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobStarted => "job_started",
            Self::AssetResolved => "asset_resolved",
            Self::GenerationStarted => "generation_started",
            Self::GenerationFinished => "generation_finished",
            Self::UploadFinished => "upload_finished",
            Self::JobFinished => "job_finished",
            Self::JobFailed => "job_failed",
        }
    }
}

/// Append-only JSONL job event log.
///
/// Every line carries `type`, `job_id` and `ts`; payload keys are merged
/// after them. The file is opened on first write and kept open.
#[derive(Debug)]
pub struct EventWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn emit(
        &self,
        job_id: &str,
        kind: JobEventKind,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(kind.as_str()));
        event.insert("job_id".to_string(), Value::from(job_id));
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        event.extend(payload);

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut slot = self
            .file
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(self.open()?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed appending to {}", self.path.display()))?;
        }
        Ok(Value::Object(event))
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening {}", self.path.display()))
    }
}
