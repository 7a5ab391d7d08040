use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;
use vidjob_contracts::JobError;

/// A job-owned path in the shared scratch directory.
///
/// The name is a fresh UUID so concurrent jobs never collide. Whatever ends
/// up at the path is removed when the guard drops; removal failures are
/// logged and otherwise ignored.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Reserves a unique path in `dir`. Nothing is created on disk.
    pub fn reserve(dir: &Path, suffix: &str) -> Self {
        Self {
            path: dir.join(unique_name(suffix)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the directory the reserved path lives in.
    pub fn prepare_dir(&self) -> Result<(), JobError> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        fs::create_dir_all(dir)
            .map_err(|err| JobError::io(format!("failed creating {}", dir.display()), err))
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed scratch file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed removing scratch file"
            ),
        }
    }
}

pub fn unique_name(suffix: &str) -> String {
    format!("{}{}", Uuid::new_v4().simple(), suffix)
}
