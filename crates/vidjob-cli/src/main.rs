use std::fs;
use std::io::{self, BufRead, ErrorKind, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vidjob_contracts::{ErrorResult, JobError, JobResponse, TaskKind};
use vidjob_engine::config::split_command;
use vidjob_engine::{JobRunner, RunnerConfig};

const DEFAULT_LOG_FILTER: &str = "vidjob_engine=info,vidjob_cli=info";

#[derive(Debug, Parser)]
#[command(name = "vidjob", version, about = "Single-job video generation runner")]
struct Cli {
    /// Fallback checkpoint directory when a request has none.
    #[arg(long, global = true)]
    ckpt_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,
    /// Generator name (`command` or `dryrun`).
    #[arg(long, global = true)]
    generator: Option<String>,
    /// Command line for the `command` generator, shell-split.
    #[arg(long, global = true)]
    generator_cmd: Option<String>,
    /// Append job events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one event and print its response.
    Handle(HandleArgs),
    /// Run JSONL events from stdin, one response line per event.
    Worker,
    /// Print supported tasks and their defaults.
    Tasks,
}

#[derive(Debug, Parser)]
struct HandleArgs {
    /// Event file; stdin when omitted.
    #[arg(long)]
    event: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vidjob error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Tasks => {
            println!("{}", serde_json::to_string_pretty(&task_table())?);
            Ok(0)
        }
        Command::Handle(args) => {
            let runner = build_runner(&cli)?;
            run_handle(&runner, args)
        }
        Command::Worker => {
            let runner = build_runner(&cli)?;
            run_worker(&runner, io::stdin().lock(), io::stdout().lock())?;
            Ok(0)
        }
    }
}

fn build_runner(cli: &Cli) -> Result<JobRunner> {
    let config = apply_overrides(RunnerConfig::from_env()?, cli)?;
    let runner = JobRunner::from_config(config)?;
    info!(
        generator = runner.generator_name(),
        work_dir = %runner.config().work_dir.display(),
        "runner ready"
    );
    Ok(runner)
}

fn apply_overrides(mut config: RunnerConfig, cli: &Cli) -> Result<RunnerConfig> {
    if let Some(ckpt_dir) = &cli.ckpt_dir {
        config.ckpt_dir = Some(ckpt_dir.clone());
    }
    if let Some(work_dir) = &cli.work_dir {
        config.work_dir = work_dir.clone();
    }
    if let Some(generator) = &cli.generator {
        config.generator = generator.clone();
    }
    if let Some(raw) = &cli.generator_cmd {
        config.generator_cmd = split_command(raw)?;
    }
    if let Some(events) = &cli.events {
        config.events_path = Some(events.clone());
    }
    Ok(config)
}

fn run_handle(runner: &JobRunner, args: &HandleArgs) -> Result<i32> {
    let raw = match &args.event {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        None => {
            let mut raw = String::new();
            io::stdin()
                .read_to_string(&mut raw)
                .context("failed reading event from stdin")?;
            raw
        }
    };
    let response = respond(runner, &raw);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(if response.is_success() { 0 } else { 1 })
}

/// Blank lines are skipped. Each response is flushed before the next event
/// is read.
fn run_worker(runner: &JobRunner, mut input: impl BufRead, mut output: impl Write) -> Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let response = respond(runner, &line);
        writeln!(output, "{}", serde_json::to_string(&response)?)?;
        output.flush()?;
    }
    Ok(())
}

fn respond(runner: &JobRunner, raw: &str) -> JobResponse {
    match serde_json::from_str::<Value>(raw) {
        Ok(event) => runner.handle_event(&event),
        Err(err) => JobResponse::Failure(ErrorResult::from_error(
            &JobError::InvalidEvent(format!("event is not valid JSON: {err}")),
            Default::default(),
        )),
    }
}

fn task_table() -> Value {
    let rows: Vec<Value> = TaskKind::all()
        .map(|kind| {
            let spec = kind.spec();
            json!({
                "task": kind.as_str(),
                "image": spec.image.as_str(),
                "sizes": spec.supported_sizes,
                "default_size": spec.default_size,
                "sample_steps": spec.sample_steps,
                "sample_shift": spec.sample_shift,
                "prompt_extend_model": {
                    "local_qwen": spec.extend_model_local,
                    "dashscope": spec.extend_model_dashscope,
                },
            })
        })
        .collect();
    Value::Array(rows)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;
    use std::path::PathBuf;

    use clap::Parser;
    use serde_json::Value;
    use vidjob_engine::{JobRunner, RunnerConfig};

    use super::{apply_overrides, run_worker, task_table, Cli};

    fn dryrun_runner(temp: &tempfile::TempDir) -> anyhow::Result<JobRunner> {
        let ckpt = temp.path().join("ckpt");
        fs::create_dir_all(&ckpt)?;
        JobRunner::from_config(RunnerConfig {
            ckpt_dir: Some(ckpt),
            work_dir: temp.path().join("work"),
            generator: "dryrun".to_string(),
            ..RunnerConfig::default()
        })
    }

    #[test]
    fn flags_override_environment_config() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "vidjob",
            "--ckpt-dir",
            "/models/lingbot",
            "--generator-cmd",
            "python3 'gen script.py' --fast",
            "worker",
        ])?;
        let config = apply_overrides(RunnerConfig::default(), &cli)?;
        assert_eq!(config.ckpt_dir, Some(PathBuf::from("/models/lingbot")));
        assert_eq!(
            config.generator_cmd,
            vec!["python3", "gen script.py", "--fast"]
        );
        assert_eq!(config.generator, "command");
        Ok(())
    }

    #[test]
    fn worker_answers_every_line_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let runner = dryrun_runner(&temp)?;
        let input = concat!(
            "{\"input\": {\"prompt\": \"a fox\", \"task\": \"t2v-A14B\"}}\n",
            "\n",
            "not json\n",
            "{\"input\": {\"task\": \"t2v-A14B\"}}\n",
        );
        let mut output = Vec::new();
        run_worker(&runner, Cursor::new(input), &mut output)?;

        let responses: Vec<Value> = String::from_utf8(output)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<_, _>>()?;
        assert_eq!(responses.len(), 3);
        assert!(responses[0]["file_size_bytes"].as_u64().is_some_and(|size| size > 0));
        assert_eq!(responses[1]["error_kind"], "invalid_event");
        assert_eq!(responses[2]["error"], "Missing required field: prompt");
        Ok(())
    }

    #[test]
    fn task_table_lists_every_task() {
        let table = task_table();
        let names: Vec<&str> = table
            .as_array()
            .map(|rows| rows.iter().filter_map(|row| row["task"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(names, vec!["i2v-A14B", "t2v-A14B", "ti2v-5B"]);
        assert_eq!(table[2]["default_size"], "1280*704");
        assert_eq!(table[0]["image"], "required");
    }
}
