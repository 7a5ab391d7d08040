use serde_json::{Map, Value};

use crate::task::ImageRequirement;
use crate::{GenerationParameters, JobError};

/// Checks that run before any file is created.
pub fn validate_payload(payload: &Map<String, Value>) -> Result<(), JobError> {
    let has_prompt = payload
        .get("prompt")
        .map(|value| match value {
            Value::String(raw) => !raw.is_empty(),
            Value::Null => false,
            _ => true,
        })
        .unwrap_or(false);
    if !has_prompt {
        return Err(JobError::MissingField("prompt"));
    }
    Ok(())
}

/// Checks on the built parameters, run before the generator is invoked.
///
/// Order: conditioning image, checkpoint directory set, checkpoint directory
/// present, frame count, size, then the counts.
pub fn validate_parameters(params: &GenerationParameters) -> Result<(), JobError> {
    let spec = params.task.spec();

    if spec.image == ImageRequirement::Required && params.image.is_none() {
        return Err(JobError::MissingAsset);
    }
    let Some(ckpt_dir) = params.ckpt_dir.as_deref() else {
        return Err(JobError::MissingCheckpoint);
    };
    if !ckpt_dir.is_dir() {
        return Err(JobError::CheckpointNotFound(ckpt_dir.to_path_buf()));
    }
    if !is_valid_frame_count(params.frame_num) {
        return Err(JobError::InvalidFrameCount(params.frame_num));
    }
    if !spec.supports_size(&params.size) {
        return Err(JobError::UnsupportedSize {
            size: params.size.clone(),
            task: params.task.to_string(),
            supported: spec.supported_sizes.join(", "),
        });
    }
    if params.ulysses_size < 1 {
        return Err(JobError::invalid_field(
            "ulysses_size",
            "a positive integer",
        ));
    }
    if params.sample_steps < 1 {
        return Err(JobError::invalid_field(
            "sample_steps",
            "a positive integer",
        ));
    }
    Ok(())
}

/// The temporal chunking of the model needs `4n + 1` frames.
pub fn is_valid_frame_count(frame_num: i64) -> bool {
    frame_num >= 1 && (frame_num - 1).rem_euclid(4) == 0
}
