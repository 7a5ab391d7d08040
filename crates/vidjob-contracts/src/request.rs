use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::params::{PromptExtendMethod, SampleSolver};
use crate::{JobError, TaskKind};

/// A request payload after lenient field coercion.
///
/// Nothing here is defaulted yet: `None` means the caller did not supply the
/// field (or supplied `null` / an empty string). Defaults are applied by
/// [`crate::ParameterBuilder`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobRequest {
    pub prompt: Option<String>,
    pub task: Option<TaskKind>,
    pub size: Option<String>,
    pub frame_num: Option<i64>,
    pub ckpt_dir: Option<PathBuf>,
    pub seed: Option<i64>,
    pub image_base64: Option<String>,
    pub image_url: Option<String>,
    pub upload_url: Option<String>,
    pub return_base64: bool,
    pub offload_model: Option<bool>,
    pub ulysses_size: Option<i64>,
    pub t5_fsdp: Option<bool>,
    pub t5_cpu: Option<bool>,
    pub dit_fsdp: Option<bool>,
    pub use_prompt_extend: Option<bool>,
    pub prompt_extend_method: Option<PromptExtendMethod>,
    pub prompt_extend_model: Option<String>,
    pub prompt_extend_target_lang: Option<String>,
    pub action_path: Option<PathBuf>,
    pub sample_solver: Option<SampleSolver>,
    pub sample_steps: Option<i64>,
    pub sample_shift: Option<f64>,
    pub sample_guide_scale: Option<f64>,
    pub convert_model_dtype: Option<bool>,
}

/// Returns the request mapping of a platform event: the `input` object when
/// present, otherwise the event itself.
pub fn event_payload(event: &Value) -> Result<&Map<String, Value>, JobError> {
    let Some(root) = event.as_object() else {
        return Err(JobError::InvalidEvent(
            "event must be a JSON object".to_string(),
        ));
    };
    match root.get("input") {
        Some(Value::Object(input)) => Ok(input),
        Some(Value::Null) | None => Ok(root),
        Some(_) => Err(JobError::InvalidEvent(
            "`input` must be a JSON object".to_string(),
        )),
    }
}

impl JobRequest {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, JobError> {
        Ok(Self {
            prompt: verbatim_text_field(payload, "prompt")?,
            task: text_field(payload, "task")?
                .map(|raw| TaskKind::parse(&raw))
                .transpose()?,
            size: text_field(payload, "size")?,
            frame_num: int_field(payload, "frame_num")?,
            ckpt_dir: text_field(payload, "ckpt_dir")?.map(PathBuf::from),
            seed: int_field(payload, "seed")?,
            image_base64: text_field(payload, "image_base64")?,
            image_url: text_field(payload, "image_url")?,
            upload_url: text_field(payload, "upload_url")?,
            return_base64: bool_field(payload, "return_base64")?.unwrap_or(false),
            offload_model: bool_field(payload, "offload_model")?,
            ulysses_size: int_field(payload, "ulysses_size")?,
            t5_fsdp: bool_field(payload, "t5_fsdp")?,
            t5_cpu: bool_field(payload, "t5_cpu")?,
            dit_fsdp: bool_field(payload, "dit_fsdp")?,
            use_prompt_extend: bool_field(payload, "use_prompt_extend")?,
            prompt_extend_method: text_field(payload, "prompt_extend_method")?
                .map(|raw| {
                    PromptExtendMethod::parse(&raw).ok_or_else(|| {
                        JobError::invalid_field("prompt_extend_method", "local_qwen or dashscope")
                    })
                })
                .transpose()?,
            prompt_extend_model: text_field(payload, "prompt_extend_model")?,
            prompt_extend_target_lang: text_field(payload, "prompt_extend_target_lang")?,
            action_path: text_field(payload, "action_path")?.map(PathBuf::from),
            sample_solver: text_field(payload, "sample_solver")?
                .map(|raw| {
                    SampleSolver::parse(&raw)
                        .ok_or_else(|| JobError::invalid_field("sample_solver", "unipc or dpm++"))
                })
                .transpose()?,
            sample_steps: int_field(payload, "sample_steps")?,
            sample_shift: float_field(payload, "sample_shift")?,
            sample_guide_scale: float_field(payload, "sample_guide_scale")?,
            convert_model_dtype: bool_field(payload, "convert_model_dtype")?,
        })
    }
}

fn present<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    payload.get(key).filter(|value| !value.is_null())
}

fn text_field(payload: &Map<String, Value>, key: &'static str) -> Result<Option<String>, JobError> {
    match present(payload, key) {
        None => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)),
        Some(_) => Err(JobError::invalid_field(key, "a string")),
    }
}

/// Like [`text_field`] but keeps surrounding whitespace; only `""` is absent.
fn verbatim_text_field(
    payload: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<String>, JobError> {
    match present(payload, key) {
        None => Ok(None),
        Some(Value::String(raw)) if raw.is_empty() => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw.clone())),
        Some(_) => Err(JobError::invalid_field(key, "a string")),
    }
}

fn int_field(payload: &Map<String, Value>, key: &'static str) -> Result<Option<i64>, JobError> {
    match present(payload, key) {
        None => Ok(None),
        Some(value) => value_as_i64(value)
            .map(Some)
            .ok_or_else(|| JobError::invalid_field(key, "an integer")),
    }
}

fn float_field(payload: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, JobError> {
    match present(payload, key) {
        None => Ok(None),
        Some(value) => value_as_f64(value)
            .map(Some)
            .ok_or_else(|| JobError::invalid_field(key, "a number")),
    }
}

fn bool_field(payload: &Map<String, Value>, key: &'static str) -> Result<Option<bool>, JobError> {
    match present(payload, key) {
        None => Ok(None),
        Some(value) => value_as_bool(value)
            .map(Some)
            .ok_or_else(|| JobError::invalid_field(key, "a boolean")),
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(raw) => {
            if let Some(exact) = raw.as_i64() {
                return Some(exact);
            }
            raw.as_f64()?
        }
        Value::String(raw) => {
            let trimmed = raw.trim();
            if let Ok(exact) = trimmed.parse::<i64>() {
                return Some(exact);
            }
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    if number.is_finite() && number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Some(number as i64)
    } else {
        None
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(raw) => raw.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(raw) => Some(*raw),
        Value::Number(raw) => raw.as_i64().map(|value| value != 0),
        Value::String(raw) => {
            let lowered = raw.trim().to_ascii_lowercase();
            if matches!(lowered.as_str(), "1" | "true" | "yes" | "on") {
                Some(true)
            } else if matches!(lowered.as_str(), "0" | "false" | "no" | "off" | "") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}
