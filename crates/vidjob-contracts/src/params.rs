use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::task::ImageRequirement;
use crate::{JobError, JobRequest, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptExtendMethod {
    #[serde(rename = "local_qwen")]
    LocalQwen,
    #[serde(rename = "dashscope")]
    Dashscope,
}

impl PromptExtendMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalQwen => "local_qwen",
            Self::Dashscope => "dashscope",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local_qwen" => Some(Self::LocalQwen),
            "dashscope" => Some(Self::Dashscope),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleSolver {
    #[serde(rename = "unipc")]
    UniPc,
    #[serde(rename = "dpm++")]
    DpmPlusPlus,
}

impl SampleSolver {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UniPc => "unipc",
            Self::DpmPlusPlus => "dpm++",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unipc" => Some(Self::UniPc),
            "dpm++" => Some(Self::DpmPlusPlus),
            _ => None,
        }
    }
}

/// The single table of request defaults.
///
/// Sampling defaults (`size`, `sample_steps`, `sample_shift`) are per task and
/// live in [`crate::TaskSpec`]; every other default is declared here. `Default` is the canonical policy; the
/// runner configuration may override `base_seed`, `t5_cpu` and `frame_num`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefaultPolicy {
    pub task: TaskKind,
    pub frame_num: i64,
    pub base_seed: i64,
    pub offload_model: bool,
    pub ulysses_size: i64,
    pub t5_fsdp: bool,
    pub t5_cpu: bool,
    pub dit_fsdp: bool,
    pub use_prompt_extend: bool,
    pub prompt_extend_method: PromptExtendMethod,
    pub prompt_extend_target_lang: String,
    pub sample_solver: SampleSolver,
    pub convert_model_dtype: bool,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            task: TaskKind::I2vA14B,
            frame_num: 81,
            base_seed: -1,
            offload_model: true,
            ulysses_size: 1,
            t5_fsdp: false,
            t5_cpu: true,
            dit_fsdp: false,
            use_prompt_extend: false,
            prompt_extend_method: PromptExtendMethod::LocalQwen,
            prompt_extend_target_lang: "zh".to_string(),
            sample_solver: SampleSolver::UniPc,
            convert_model_dtype: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptExtension {
    pub method: PromptExtendMethod,
    pub model: String,
    pub target_lang: String,
}

/// Everything the generation routine is called with.
///
/// `ckpt_dir` is `None` only when neither the request nor the runner names
/// one; [`crate::validate::validate_parameters`] rejects that after checking
/// the conditioning image. `sample_guide_scale` is passed only when the
/// request sets it, otherwise the model's own configuration applies. `image`,
/// `action_path` and `prompt_extend` are inputs a job may legitimately not
/// have; every other tunable is concrete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParameters {
    pub task: TaskKind,
    pub size: String,
    pub frame_num: i64,
    pub ckpt_dir: Option<PathBuf>,
    pub offload_model: bool,
    pub ulysses_size: i64,
    pub t5_fsdp: bool,
    pub t5_cpu: bool,
    pub dit_fsdp: bool,
    pub save_file: PathBuf,
    pub prompt: String,
    pub prompt_extend: Option<PromptExtension>,
    pub base_seed: i64,
    pub image: Option<PathBuf>,
    pub action_path: Option<PathBuf>,
    pub sample_solver: SampleSolver,
    pub sample_steps: i64,
    pub sample_shift: f64,
    pub sample_guide_scale: Option<f64>,
    pub convert_model_dtype: bool,
}

/// Maps a [`JobRequest`] onto [`GenerationParameters`].
#[derive(Debug, Clone, Copy)]
pub struct ParameterBuilder<'a> {
    policy: &'a DefaultPolicy,
    fallback_ckpt_dir: Option<&'a Path>,
}

impl<'a> ParameterBuilder<'a> {
    pub fn new(policy: &'a DefaultPolicy, fallback_ckpt_dir: Option<&'a Path>) -> Self {
        Self {
            policy,
            fallback_ckpt_dir,
        }
    }

    pub fn task(&self, request: &JobRequest) -> TaskKind {
        request.task.unwrap_or(self.policy.task)
    }

    /// The only failure is a missing prompt, normally caught earlier by the
    /// shallow pass.
    pub fn build(
        &self,
        request: &JobRequest,
        image: Option<&Path>,
        output_path: &Path,
    ) -> Result<GenerationParameters, JobError> {
        let policy = self.policy;
        let task = self.task(request);
        let spec = task.spec();

        let prompt = request
            .prompt
            .clone()
            .ok_or(JobError::MissingField("prompt"))?;
        let ckpt_dir = request
            .ckpt_dir
            .clone()
            .or_else(|| self.fallback_ckpt_dir.map(Path::to_path_buf));

        let image = match spec.image {
            ImageRequirement::Unused => None,
            ImageRequirement::Required | ImageRequirement::Optional => {
                image.map(Path::to_path_buf)
            }
        };

        let prompt_extend = if request
            .use_prompt_extend
            .unwrap_or(policy.use_prompt_extend)
        {
            let method = request
                .prompt_extend_method
                .unwrap_or(policy.prompt_extend_method);
            let model = request.prompt_extend_model.clone().unwrap_or_else(|| {
                match method {
                    PromptExtendMethod::LocalQwen => spec.extend_model_local,
                    PromptExtendMethod::Dashscope => spec.extend_model_dashscope,
                }
                .to_string()
            });
            Some(PromptExtension {
                method,
                model,
                target_lang: request
                    .prompt_extend_target_lang
                    .clone()
                    .unwrap_or_else(|| policy.prompt_extend_target_lang.clone()),
            })
        } else {
            None
        };

        Ok(GenerationParameters {
            task,
            size: request
                .size
                .clone()
                .unwrap_or_else(|| spec.default_size.to_string()),
            frame_num: request.frame_num.unwrap_or(policy.frame_num),
            ckpt_dir,
            offload_model: request.offload_model.unwrap_or(policy.offload_model),
            ulysses_size: request.ulysses_size.unwrap_or(policy.ulysses_size),
            t5_fsdp: request.t5_fsdp.unwrap_or(policy.t5_fsdp),
            t5_cpu: request.t5_cpu.unwrap_or(policy.t5_cpu),
            dit_fsdp: request.dit_fsdp.unwrap_or(policy.dit_fsdp),
            save_file: output_path.to_path_buf(),
            prompt,
            prompt_extend,
            base_seed: request.seed.unwrap_or(policy.base_seed),
            image,
            action_path: request.action_path.clone(),
            sample_solver: request.sample_solver.unwrap_or(policy.sample_solver),
            sample_steps: request.sample_steps.unwrap_or(spec.sample_steps),
            sample_shift: request.sample_shift.unwrap_or(spec.sample_shift),
            sample_guide_scale: request.sample_guide_scale,
            convert_model_dtype: request
                .convert_model_dtype
                .unwrap_or(policy.convert_model_dtype),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use serde_json::{json, Map, Value};

    use super::{DefaultPolicy, ParameterBuilder, PromptExtendMethod, SampleSolver};
    use crate::{JobError, JobRequest, TaskKind};

    fn request(value: Value) -> JobRequest {
        let payload: Map<String, Value> = value.as_object().cloned().unwrap_or_default();
        JobRequest::from_payload(&payload).unwrap_or_default()
    }

    #[test]
    fn build_fills_every_default_from_policy_and_task_table() -> anyhow::Result<()> {
        let policy = DefaultPolicy::default();
        let builder = ParameterBuilder::new(&policy, Some(Path::new("/ckpt/env")));
        let params = builder.build(
            &request(json!({"prompt": "a fox"})),
            Some(Path::new("/tmp/in.jpg")),
            Path::new("/tmp/outputs/out.mp4"),
        )?;

        assert_eq!(params.task, TaskKind::I2vA14B);
        assert_eq!(params.size, "480*832");
        assert_eq!(params.frame_num, 81);
        assert_eq!(params.ckpt_dir, Some(PathBuf::from("/ckpt/env")));
        assert!(params.offload_model);
        assert_eq!(params.ulysses_size, 1);
        assert!(params.t5_cpu);
        assert!(!params.t5_fsdp);
        assert!(!params.dit_fsdp);
        assert_eq!(params.base_seed, -1);
        assert_eq!(params.image, Some(PathBuf::from("/tmp/in.jpg")));
        assert_eq!(params.save_file, PathBuf::from("/tmp/outputs/out.mp4"));
        assert_eq!(params.sample_solver, SampleSolver::UniPc);
        assert_eq!(params.sample_steps, 40);
        assert_eq!(params.sample_shift, 5.0);
        assert_eq!(params.sample_guide_scale, None);
        assert!(params.prompt_extend.is_none());
        assert!(params.action_path.is_none());
        Ok(())
    }

    #[test]
    fn request_values_override_defaults() -> anyhow::Result<()> {
        let policy = DefaultPolicy::default();
        let builder = ParameterBuilder::new(&policy, Some(Path::new("/ckpt/env")));
        let params = builder.build(
            &request(json!({
                "prompt": "a fox",
                "task": "t2v-A14B",
                "size": "832*480",
                "frame_num": 17,
                "ckpt_dir": "/ckpt/request",
                "seed": 7,
                "t5_cpu": false,
                "sample_steps": 20,
                "sample_guide_scale": 4.5,
                "use_prompt_extend": true,
                "prompt_extend_method": "dashscope",
            })),
            Some(Path::new("/tmp/in.jpg")),
            Path::new("/tmp/out.mp4"),
        )?;

        assert_eq!(params.task, TaskKind::T2vA14B);
        assert_eq!(params.size, "832*480");
        assert_eq!(params.frame_num, 17);
        assert_eq!(params.ckpt_dir, Some(PathBuf::from("/ckpt/request")));
        assert_eq!(params.base_seed, 7);
        assert!(!params.t5_cpu);
        assert_eq!(params.sample_steps, 20);
        assert_eq!(params.sample_shift, 12.0);
        assert_eq!(params.sample_guide_scale, Some(4.5));
        // text-to-video never receives the conditioning image
        assert_eq!(params.image, None);
        let extend = params.prompt_extend.expect("prompt extension enabled");
        assert_eq!(extend.method, PromptExtendMethod::Dashscope);
        assert_eq!(extend.model, "qwen-plus");
        assert_eq!(extend.target_lang, "zh");
        Ok(())
    }

    #[test]
    fn policy_overrides_apply_when_request_is_silent() -> anyhow::Result<()> {
        let policy = DefaultPolicy {
            base_seed: 42,
            t5_cpu: false,
            frame_num: 121,
            ..DefaultPolicy::default()
        };
        let builder = ParameterBuilder::new(&policy, Some(Path::new("/ckpt")));
        let params = builder.build(
            &request(json!({"prompt": "a fox"})),
            None,
            Path::new("/tmp/out.mp4"),
        )?;
        assert_eq!(params.base_seed, 42);
        assert!(!params.t5_cpu);
        assert_eq!(params.frame_num, 121);
        Ok(())
    }

    #[test]
    fn missing_checkpoint_is_left_for_validation() -> anyhow::Result<()> {
        let policy = DefaultPolicy::default();
        let builder = ParameterBuilder::new(&policy, None);
        let params = builder.build(
            &request(json!({"prompt": "a fox"})),
            None,
            Path::new("/tmp/out.mp4"),
        )?;
        assert_eq!(params.ckpt_dir, None);
        Ok(())
    }

    #[test]
    fn build_without_prompt_is_missing_field() {
        let policy = DefaultPolicy::default();
        let err = ParameterBuilder::new(&policy, Some(Path::new("/ckpt")))
            .build(&JobRequest::default(), None, Path::new("/tmp/out.mp4"))
            .unwrap_err();
        assert!(matches!(err, JobError::MissingField("prompt")));
    }
}
