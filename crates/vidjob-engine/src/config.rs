//! Runner configuration.
//!
//! Read once at process start. Jobs see it as injected configuration and
//! never consult the environment themselves.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use vidjob_contracts::{DefaultPolicy, CKPT_DIR_ENV};

pub const LEGACY_CKPT_DIR_ENV: &str = "LINGBOT_CKPT_DIR";
pub const DEFAULT_GENERATOR: &str = "command";
pub const DEFAULT_GENERATOR_CMD: &str = "python generate.py";
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Used when a request carries no `ckpt_dir`.
    pub ckpt_dir: Option<PathBuf>,
    /// Root for downloaded assets; artifacts go to `outputs/` below it.
    pub work_dir: PathBuf,
    pub generator: String,
    /// Program and leading arguments for the `command` generator.
    pub generator_cmd: Vec<String>,
    pub upload_timeout: Duration,
    pub fetch_timeout: Duration,
    pub defaults: DefaultPolicy,
    pub events_path: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ckpt_dir: None,
            work_dir: env::temp_dir(),
            generator: DEFAULT_GENERATOR.to_string(),
            generator_cmd: DEFAULT_GENERATOR_CMD
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            defaults: DefaultPolicy::default(),
            events_path: None,
        }
    }
}

impl RunnerConfig {
    /// Builds configuration from process environment variables.
    ///
    /// - VIDJOB_CKPT_DIR (falls back to LINGBOT_CKPT_DIR)
    /// - VIDJOB_WORK_DIR (default: OS temp dir)
    /// - VIDJOB_GENERATOR (default: command)
    /// - VIDJOB_GENERATOR_CMD (default: "python generate.py")
    /// - VIDJOB_UPLOAD_TIMEOUT_SECS (default: 300)
    /// - VIDJOB_FETCH_TIMEOUT_SECS (default: 120)
    /// - VIDJOB_DEFAULT_SEED, VIDJOB_DEFAULT_T5_CPU, VIDJOB_DEFAULT_FRAME_NUM
    /// - VIDJOB_EVENTS (optional JSONL event log)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        config.ckpt_dir = get(CKPT_DIR_ENV)
            .or_else(|| get(LEGACY_CKPT_DIR_ENV))
            .map(PathBuf::from);
        if let Some(work_dir) = get("VIDJOB_WORK_DIR") {
            config.work_dir = PathBuf::from(work_dir);
        }
        if let Some(generator) = get("VIDJOB_GENERATOR") {
            config.generator = generator;
        }
        if let Some(raw) = get("VIDJOB_GENERATOR_CMD") {
            config.generator_cmd = split_command(&raw)?;
        }
        if let Some(raw) = get("VIDJOB_UPLOAD_TIMEOUT_SECS") {
            config.upload_timeout = Duration::from_secs(parse_env("VIDJOB_UPLOAD_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("VIDJOB_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(parse_env("VIDJOB_FETCH_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("VIDJOB_DEFAULT_SEED") {
            config.defaults.base_seed = parse_env("VIDJOB_DEFAULT_SEED", &raw)?;
        }
        if let Some(raw) = get("VIDJOB_DEFAULT_T5_CPU") {
            config.defaults.t5_cpu = parse_bool("VIDJOB_DEFAULT_T5_CPU", &raw)?;
        }
        if let Some(raw) = get("VIDJOB_DEFAULT_FRAME_NUM") {
            config.defaults.frame_num = parse_env("VIDJOB_DEFAULT_FRAME_NUM", &raw)?;
        }
        config.events_path = get("VIDJOB_EVENTS").map(PathBuf::from);
        Ok(config)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("outputs")
    }
}

pub fn split_command(raw: &str) -> Result<Vec<String>> {
    let words = shell_words::split(raw)
        .with_context(|| format!("invalid generator command line: {raw}"))?;
    if words.is_empty() {
        bail!("generator command line is empty");
    }
    Ok(words)
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("{key} has an invalid value: {raw}"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{key} has an invalid value: {raw}"),
    }
}
