use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub output_path: String,
    pub file_size_bytes: u64,
    pub duration_seconds: f64,
    pub frame_num: i64,
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<UploadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_base64: Option<String>,
}

impl JobResult {
    pub fn record_upload(&mut self, outcome: Result<String, JobError>) {
        match outcome {
            Ok(output_url) => {
                self.upload_status = Some(UploadStatus::Success);
                self.output_url = Some(output_url);
                self.upload_error = None;
            }
            Err(err) => {
                self.upload_status = Some(UploadStatus::Failed);
                self.output_url = None;
                self.upload_error = Some(err.to_string());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub error: String,
    pub error_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    pub duration_seconds: f64,
}

impl ErrorResult {
    pub fn from_error(err: &JobError, elapsed: Duration) -> Self {
        Self {
            error: err.to_string(),
            error_kind: err.kind().to_string(),
            traceback: err.trace(),
            duration_seconds: round_seconds(elapsed),
        }
    }
}

/// What the caller receives: exactly one of a result or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResponse {
    Success(JobResult),
    Failure(ErrorResult),
}

impl JobResponse {
    pub fn from_outcome(outcome: Result<JobResult, JobError>, elapsed: Duration) -> Self {
        match outcome {
            Ok(mut result) => {
                result.duration_seconds = round_seconds(elapsed);
                Self::Success(result)
            }
            Err(err) => Self::Failure(ErrorResult::from_error(&err, elapsed)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Seconds rounded to two decimals.
pub fn round_seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}
