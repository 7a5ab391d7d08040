//! Single-job video generation runner.
//!
//! A job moves through one pass: shallow validation, asset resolution,
//! parameter building, deep validation, one generator call, delivery.

pub mod assets;
pub mod config;
pub mod generator;
pub mod invoke;
pub mod publish;
pub mod runner;
pub mod scratch;

#[cfg(test)]
mod test_support;

pub use assets::{AssetOrigin, AssetResolver, ResolvedAsset};
pub use config::RunnerConfig;
pub use generator::{
    default_generator_registry, CommandGenerator, DryrunGenerator, GeneratorRegistry,
    VideoGenerator,
};
pub use publish::{Publisher, UploadReceipt};
pub use runner::JobRunner;
