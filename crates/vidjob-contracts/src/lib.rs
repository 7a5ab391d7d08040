//! Request, parameter and response contracts for single video generation jobs.

pub mod error;
pub mod events;
pub mod params;
pub mod request;
pub mod response;
pub mod task;
pub mod validate;

pub use error::JobError;
pub use events::{EventWriter, JobEventKind};
pub use params::{
    DefaultPolicy, GenerationParameters, ParameterBuilder, PromptExtendMethod, PromptExtension,
    SampleSolver,
};
pub use request::{event_payload, JobRequest};
pub use response::{ErrorResult, JobResponse, JobResult, UploadStatus};
pub use task::{ImageRequirement, TaskKind, TaskSpec};

/// Environment variable holding the fallback checkpoint directory.
pub const CKPT_DIR_ENV: &str = "VIDJOB_CKPT_DIR";
