use std::path::PathBuf;

use thiserror::Error;

use crate::CKPT_DIR_ENV;

/// Every way a job can end without a generated artifact, plus the non-fatal
/// upload failure that is annotated onto an otherwise successful result.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: String,
    },

    #[error("Unsupported task: {task}. Supported tasks: {supported}")]
    UnsupportedTask { task: String, supported: String },

    #[error("Unsupported size {size} for task {task}. Supported sizes: {supported}")]
    UnsupportedSize {
        size: String,
        task: String,
        supported: String,
    },

    #[error("Missing image. Provide image_base64 or image_url.")]
    MissingAsset,

    #[error("Failed to download image from {url}: {reason}")]
    FetchError { url: String, reason: String },

    #[error("Failed to decode image_base64: {0}")]
    DecodeError(String),

    #[error("Missing ckpt_dir. Provide ckpt_dir or set {} env var.", CKPT_DIR_ENV)]
    MissingCheckpoint,

    #[error("Checkpoint directory not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("frame_num must be 4n+1 (e.g., 17, 81, 161, 321). Got: {0}")]
    InvalidFrameCount(i64),

    #[error("Generation completed but output file not found: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("{0}")]
    UploadFailure(String),

    #[error("{0}")]
    GenerationFailure(anyhow::Error),

    /// A panic or other fault outside the generator call.
    #[error("{0}")]
    Internal(anyhow::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid_field(field: &'static str, expected: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            expected: expected.into(),
        }
    }

    /// Stable snake_case tag reported as `error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidEvent(_) => "invalid_event",
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::UnsupportedTask { .. } => "unsupported_task",
            Self::UnsupportedSize { .. } => "unsupported_size",
            Self::MissingAsset => "missing_asset",
            Self::FetchError { .. } => "fetch_error",
            Self::DecodeError(_) => "decode_error",
            Self::MissingCheckpoint => "missing_checkpoint",
            Self::CheckpointNotFound(_) => "checkpoint_not_found",
            Self::InvalidFrameCount(_) => "invalid_frame_count",
            Self::OutputMissing(_) => "output_missing",
            Self::UploadFailure(_) => "upload_failure",
            Self::GenerationFailure(_) => "generation_failure",
            Self::Internal(_) => "internal_error",
            Self::Io { .. } => "io_error",
        }
    }

    /// Errors raised before the generator runs, caused by the request itself.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidEvent(_)
                | Self::MissingField(_)
                | Self::InvalidField { .. }
                | Self::UnsupportedTask { .. }
                | Self::UnsupportedSize { .. }
                | Self::MissingAsset
                | Self::FetchError { .. }
                | Self::DecodeError(_)
                | Self::MissingCheckpoint
                | Self::CheckpointNotFound(_)
                | Self::InvalidFrameCount(_)
        )
    }

    /// Diagnostic trace for unexpected failures. Validation errors carry none.
    pub fn trace(&self) -> Option<String> {
        match self {
            Self::GenerationFailure(err) | Self::Internal(err) => Some(format!("{err:?}")),
            Self::Io { context, source } => Some(format!("{context}: {source:?}")),
            _ => None,
        }
    }
}
