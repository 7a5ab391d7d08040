use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;
use vidjob_contracts::events::{EventPayload, EventWriter, JobEventKind};
use vidjob_contracts::validate::{validate_parameters, validate_payload};
use vidjob_contracts::{
    event_payload, JobError, JobRequest, JobResponse, JobResult, ParameterBuilder,
};

use crate::assets::{AssetResolver, ResolvedAsset};
use crate::config::RunnerConfig;
use crate::generator::{default_generator_registry, VideoGenerator};
use crate::invoke::{invoke_generator, panic_message};
use crate::publish::Publisher;
use crate::scratch::ScratchFile;

/// Runs one job per call, start to finish.
///
/// `handle_event` and `run` never fail: every outcome, including a panic
/// anywhere in the job, comes back as a [`JobResponse`]. Files the job creates
/// are owned by scoped guards and are gone by the time the response is built,
/// unwinding included.
pub struct JobRunner {
    config: RunnerConfig,
    generator: Box<dyn VideoGenerator>,
    resolver: AssetResolver,
    publisher: Publisher,
    events: Option<EventWriter>,
}

impl JobRunner {
    /// Picks the configured generator out of the default registry.
    pub fn from_config(config: RunnerConfig) -> Result<Self> {
        let mut registry = default_generator_registry(&config.generator_cmd);
        let Some(generator) = registry.take(&config.generator) else {
            bail!(
                "unknown generator `{}` (available: {})",
                config.generator,
                registry.names().join(", ")
            );
        };
        Self::new(config, generator)
    }

    pub fn new(config: RunnerConfig, generator: Box<dyn VideoGenerator>) -> Result<Self> {
        let resolver = AssetResolver::new(&config.work_dir, config.fetch_timeout)?;
        let publisher = Publisher::new(config.upload_timeout)?;
        Ok(Self::with_parts(config, generator, resolver, publisher))
    }

    pub fn with_parts(
        config: RunnerConfig,
        generator: Box<dyn VideoGenerator>,
        resolver: AssetResolver,
        publisher: Publisher,
    ) -> Self {
        let events = config.events_path.clone().map(EventWriter::new);
        Self {
            config,
            generator,
            resolver,
            publisher,
            events,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Accepts either `{"input": {...}}` or a bare payload object.
    pub fn handle_event(&self, event: &Value) -> JobResponse {
        let started = Instant::now();
        let job_id = new_job_id();
        self.emit(&job_id, JobEventKind::JobStarted, Map::new());
        let outcome = event_payload(event).and_then(|payload| self.contained(&job_id, payload));
        self.finish(&job_id, outcome, started)
    }

    pub fn run(&self, payload: &Map<String, Value>) -> JobResponse {
        let started = Instant::now();
        let job_id = new_job_id();
        self.emit(&job_id, JobEventKind::JobStarted, Map::new());
        let outcome = self.contained(&job_id, payload);
        self.finish(&job_id, outcome, started)
    }

    fn contained(&self, job_id: &str, payload: &Map<String, Value>) -> Result<JobResult, JobError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.execute(job_id, payload))).unwrap_or_else(
            |fault| {
                Err(JobError::Internal(anyhow!(
                    "job panicked: {}",
                    panic_message(fault.as_ref())
                )))
            },
        )
    }

    fn execute(&self, job_id: &str, payload: &Map<String, Value>) -> Result<JobResult, JobError> {
        validate_payload(payload)?;
        let request = JobRequest::from_payload(payload)?;

        let asset = self.resolver.resolve(&request)?;
        if let Some(asset) = &asset {
            self.emit(
                job_id,
                JobEventKind::AssetResolved,
                object(json!({
                    "origin": asset.origin().as_str(),
                    "path": asset.path().to_string_lossy(),
                    "bytes": asset.size_bytes(),
                })),
            );
        }

        let output = ScratchFile::reserve(&self.config.output_dir(), ".mp4");
        let params = ParameterBuilder::new(&self.config.defaults, self.config.ckpt_dir.as_deref())
            .build(
                &request,
                asset.as_ref().map(ResolvedAsset::path),
                output.path(),
            )?;
        validate_parameters(&params)?;
        output.prepare_dir()?;

        info!(
            job_id,
            task = %params.task,
            size = %params.size,
            frame_num = params.frame_num,
            seed = params.base_seed,
            generator = self.generator.name(),
            "starting generation"
        );
        self.emit(
            job_id,
            JobEventKind::GenerationStarted,
            object(json!({
                "task": params.task.as_str(),
                "size": params.size,
                "frame_num": params.frame_num,
                "generator": self.generator.name(),
            })),
        );

        let file_size_bytes = invoke_generator(self.generator.as_ref(), &params)?;
        info!(job_id, bytes = file_size_bytes, "generation finished");
        self.emit(
            job_id,
            JobEventKind::GenerationFinished,
            object(json!({ "file_size_bytes": file_size_bytes })),
        );

        let mut result = JobResult {
            output_path: output.path().to_string_lossy().into_owned(),
            file_size_bytes,
            duration_seconds: 0.0,
            frame_num: params.frame_num,
            size: params.size.clone(),
            upload_status: None,
            output_url: None,
            upload_error: None,
            output_base64: None,
        };
        self.publisher.publish(output.path(), &request, &mut result)?;
        if let Some(status) = result.upload_status {
            self.emit(
                job_id,
                JobEventKind::UploadFinished,
                object(json!({
                    "upload_status": status,
                    "output_url": result.output_url,
                    "upload_error": result.upload_error,
                })),
            );
        }
        Ok(result)
    }

    fn finish(
        &self,
        job_id: &str,
        outcome: Result<JobResult, JobError>,
        started: Instant,
    ) -> JobResponse {
        if let Err(err) = &outcome {
            if err.is_validation() {
                warn!(job_id, kind = err.kind(), error = %err, "job rejected");
            } else {
                error!(job_id, kind = err.kind(), error = %err, "job failed");
            }
        }
        let response = JobResponse::from_outcome(outcome, started.elapsed());
        match &response {
            JobResponse::Success(result) => {
                info!(
                    job_id,
                    seconds = result.duration_seconds,
                    bytes = result.file_size_bytes,
                    "job finished"
                );
                self.emit(
                    job_id,
                    JobEventKind::JobFinished,
                    object(json!({
                        "duration_seconds": result.duration_seconds,
                        "file_size_bytes": result.file_size_bytes,
                    })),
                );
            }
            JobResponse::Failure(failure) => self.emit(
                job_id,
                JobEventKind::JobFailed,
                object(json!({
                    "error": failure.error,
                    "error_kind": failure.error_kind,
                    "duration_seconds": failure.duration_seconds,
                })),
            ),
        }
        response
    }

    fn emit(&self, job_id: &str, kind: JobEventKind, payload: EventPayload) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(job_id, kind, payload) {
            warn!(
                path = %events.path().display(),
                error = %err,
                "failed writing job event"
            );
        }
    }
}

fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
