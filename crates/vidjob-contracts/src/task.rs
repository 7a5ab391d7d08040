use std::fmt;

use serde::{Deserialize, Serialize};

use crate::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "i2v-A14B")]
    I2vA14B,
    #[serde(rename = "t2v-A14B")]
    T2vA14B,
    #[serde(rename = "ti2v-5B")]
    Ti2v5B,
}

/// Whether a task consumes the conditioning image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRequirement {
    Required,
    Optional,
    Unused,
}

impl ImageRequirement {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
            Self::Unused => "unused",
        }
    }
}

/// Per-task capabilities and sampling defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub image: ImageRequirement,
    pub supported_sizes: &'static [&'static str],
    pub default_size: &'static str,
    pub sample_steps: i64,
    pub sample_shift: f64,
    pub extend_model_local: &'static str,
    pub extend_model_dashscope: &'static str,
}

const A14B_SIZES: &[&str] = &["720*1280", "1280*720", "480*832", "832*480"];
const TI2V_5B_SIZES: &[&str] = &["704*1280", "1280*704"];

const TASKS: &[TaskSpec] = &[
    TaskSpec {
        kind: TaskKind::I2vA14B,
        image: ImageRequirement::Required,
        supported_sizes: A14B_SIZES,
        default_size: "480*832",
        sample_steps: 40,
        sample_shift: 5.0,
        extend_model_local: "Qwen/Qwen2.5-VL-7B-Instruct",
        extend_model_dashscope: "qwen-vl-max",
    },
    TaskSpec {
        kind: TaskKind::T2vA14B,
        image: ImageRequirement::Unused,
        supported_sizes: A14B_SIZES,
        default_size: "480*832",
        sample_steps: 40,
        sample_shift: 12.0,
        extend_model_local: "Qwen/Qwen2.5-14B-Instruct",
        extend_model_dashscope: "qwen-plus",
    },
    TaskSpec {
        kind: TaskKind::Ti2v5B,
        image: ImageRequirement::Optional,
        supported_sizes: TI2V_5B_SIZES,
        default_size: "1280*704",
        sample_steps: 50,
        sample_shift: 5.0,
        extend_model_local: "Qwen/Qwen2.5-VL-7B-Instruct",
        extend_model_dashscope: "qwen-vl-max",
    },
];

impl TaskKind {
    pub fn all() -> impl Iterator<Item = TaskKind> {
        TASKS.iter().map(|spec| spec.kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::I2vA14B => "i2v-A14B",
            Self::T2vA14B => "t2v-A14B",
            Self::Ti2v5B => "ti2v-5B",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, JobError> {
        let value = raw.trim();
        Self::all()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| JobError::UnsupportedTask {
                task: value.to_string(),
                supported: Self::all()
                    .map(TaskKind::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn spec(self) -> &'static TaskSpec {
        TASKS
            .iter()
            .find(|spec| spec.kind == self)
            .unwrap_or(&TASKS[0])
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TaskSpec {
    pub fn supports_size(&self, size: &str) -> bool {
        self.supported_sizes.contains(&size)
    }
}

/// Parses a `W*H` size string.
pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (width, height) = size.trim().split_once('*')?;
    let width = width.trim().parse::<u32>().ok()?;
    let height = height.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}
