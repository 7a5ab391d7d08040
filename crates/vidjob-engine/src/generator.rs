use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use vidjob_contracts::task::parse_size;
use vidjob_contracts::GenerationParameters;

/// The external generation routine.
///
/// `generate` blocks until the routine finishes. On `Ok(())` the artifact is
/// expected at `params.save_file`.
pub trait VideoGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, params: &GenerationParameters) -> Result<()>;
}

#[derive(Default)]
pub struct GeneratorRegistry {
    generators: BTreeMap<String, Box<dyn VideoGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: VideoGenerator + 'static>(&mut self, generator: G) {
        self.generators
            .insert(generator.name().to_string(), Box::new(generator));
    }

    pub fn take(&mut self, name: &str) -> Option<Box<dyn VideoGenerator>> {
        self.generators.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }
}

pub fn default_generator_registry(command: &[String]) -> GeneratorRegistry {
    let mut generators = GeneratorRegistry::new();
    generators.register(DryrunGenerator);
    if let Some(generator) = CommandGenerator::from_words(command) {
        generators.register(generator);
    }
    generators
}

/// Writes a tiny MP4-shaped file derived from the prompt and seed.
pub struct DryrunGenerator;

impl VideoGenerator for DryrunGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, params: &GenerationParameters) -> Result<()> {
        let (width, height) = parse_size(&params.size).unwrap_or((0, 0));
        let mut hasher = Sha256::new();
        hasher.update(params.prompt.as_bytes());
        hasher.update(params.base_seed.to_be_bytes());
        hasher.update(params.frame_num.to_be_bytes());
        let digest = hex::encode(hasher.finalize());

        let mut bytes = Vec::new();
        push_box(&mut bytes, b"ftyp", b"isom\0\0\x02\0isomiso2mp41");
        let note = format!(
            "vidjob-dryrun task={} size={}x{} frames={} digest={}",
            params.task, width, height, params.frame_num, digest
        );
        push_box(&mut bytes, b"free", note.as_bytes());

        if let Some(parent) = params.save_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&params.save_file, bytes)
            .with_context(|| format!("failed writing {}", params.save_file.display()))?;
        Ok(())
    }
}

fn push_box(out: &mut Vec<u8>, kind: &[u8; 4], payload: &[u8]) {
    let len = (payload.len() + 8) as u32;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
}

/// Runs an external program, passing parameters as `--flag value` arguments.
pub struct CommandGenerator {
    program: String,
    leading_args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    pub fn from_words(words: &[String]) -> Option<Self> {
        let (program, rest) = words.split_first()?;
        Some(Self::new(program.clone(), rest.to_vec()))
    }

    pub fn command_args(params: &GenerationParameters) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: String| {
            args.push(format!("--{flag}"));
            args.push(value);
        };
        push("task", params.task.to_string());
        push("size", params.size.clone());
        push("frame_num", params.frame_num.to_string());
        if let Some(ckpt_dir) = &params.ckpt_dir {
            push("ckpt_dir", path_arg(ckpt_dir));
        }
        push("offload_model", python_bool(params.offload_model));
        push("ulysses_size", params.ulysses_size.to_string());
        push("save_file", path_arg(&params.save_file));
        push("prompt", params.prompt.clone());
        push("base_seed", params.base_seed.to_string());
        if let Some(image) = &params.image {
            push("image", path_arg(image));
        }
        if let Some(action_path) = &params.action_path {
            push("action_path", path_arg(action_path));
        }
        if let Some(extend) = &params.prompt_extend {
            push("prompt_extend_method", extend.method.as_str().to_string());
            push("prompt_extend_model", extend.model.clone());
            push("prompt_extend_target_lang", extend.target_lang.clone());
        }
        push("sample_solver", params.sample_solver.as_str().to_string());
        push("sample_steps", params.sample_steps.to_string());
        push("sample_shift", trim_float(params.sample_shift));
        if let Some(scale) = params.sample_guide_scale {
            push("sample_guide_scale", trim_float(scale));
        }

        for (flag, enabled) in [
            ("t5_fsdp", params.t5_fsdp),
            ("t5_cpu", params.t5_cpu),
            ("dit_fsdp", params.dit_fsdp),
            ("use_prompt_extend", params.prompt_extend.is_some()),
            ("convert_model_dtype", params.convert_model_dtype),
        ] {
            if enabled {
                args.push(format!("--{flag}"));
            }
        }
        args
    }
}

impl VideoGenerator for CommandGenerator {
    fn name(&self) -> &str {
        "command"
    }

    fn generate(&self, params: &GenerationParameters) -> Result<()> {
        let args = Self::command_args(params);
        debug!(program = %self.program, ?args, "spawning generator");
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(&args)
            .stdin(Stdio::null())
            // our stdout carries job responses
            .stdout(std::io::stderr())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start generator `{}`", self.program))?;

        let tail = match child.stderr.take() {
            Some(pipe) => relay_stderr(pipe, STDERR_TAIL_LINES)?,
            None => VecDeque::new(),
        };
        let status = child.wait().context("failed waiting for generator")?;
        if !status.success() {
            let tail = Vec::from(tail).join("\n");
            match status.code() {
                Some(code) => bail!("generator exited with status {code}:\n{tail}"),
                None => bail!("generator terminated by signal:\n{tail}"),
            }
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn python_bool(value: bool) -> String {
    let text = if value { "True" } else { "False" };
    text.to_string()
}

fn trim_float(value: f64) -> String {
    let text = format!("{value:.6}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

const STDERR_TAIL_LINES: usize = 20;

/// Logs each stderr line as it arrives and returns the last `keep` lines.
fn relay_stderr(pipe: impl Read, keep: usize) -> Result<VecDeque<String>> {
    let mut reader = BufReader::new(pipe);
    let mut tail = VecDeque::with_capacity(keep);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let read = reader
            .read_until(b'\n', &mut raw)
            .context("failed reading generator stderr")?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        info!(target: "vidjob_engine::generator", "{line}");
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Ok(tail)
}
