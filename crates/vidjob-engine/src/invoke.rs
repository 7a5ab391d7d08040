use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};

use anyhow::anyhow;
use vidjob_contracts::{GenerationParameters, JobError};

use crate::generator::VideoGenerator;

/// Calls the generator exactly once and returns the artifact size.
///
/// A generator error or panic is a `GenerationFailure`; a normal return with
/// no file at `save_file` is `OutputMissing`.
pub fn invoke_generator(
    generator: &dyn VideoGenerator,
    params: &GenerationParameters,
) -> Result<u64, JobError> {
    match panic::catch_unwind(AssertUnwindSafe(|| generator.generate(params))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(JobError::GenerationFailure(err)),
        Err(payload) => {
            return Err(JobError::GenerationFailure(anyhow!(
                "generator `{}` panicked: {}",
                generator.name(),
                panic_message(payload.as_ref())
            )))
        }
    }

    match fs::metadata(&params.save_file) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(JobError::OutputMissing(params.save_file.clone())),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic payload".to_string()
}
