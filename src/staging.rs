//! Run directory staging.
//!
//! Every invocation writes into `outputs/<YYYY-MM-DD-HH-MM-SS>/`, with the
//! input configuration copied in verbatim for provenance. A second invocation
//! within the same second gets a `-2`, `-3`, ... suffix instead of failing.

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the configuration copy inside the run directory.
pub const CONFIG_COPY_NAME: &str = "config.yaml";
/// Name of the generated artifact inside the run directory.
pub const RESULT_NAME: &str = "result.gif";

/// A freshly created, timestamped output directory.
#[derive(Debug)]
pub struct RunDir {
    path: PathBuf,
}

impl RunDir {
    /// Create `base/<timestamp>` (disambiguated on collision) for the given
    /// wall-clock time.
    pub fn create(base: impl AsRef<Path>, now: DateTime<Local>) -> io::Result<Self> {
        let base = base.as_ref();
        fs::create_dir_all(base)?;

        let stamp = now.format("%Y-%m-%d-%H-%M-%S").to_string();
        let mut candidate = base.join(&stamp);
        let mut counter = 2;
        loop {
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(Self { path: candidate }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = base.join(format!("{stamp}-{counter}"));
                    counter += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Copy the input configuration file into the run directory, byte for
    /// byte, returning the destination path.
    pub fn stage_config(&self, config_path: impl AsRef<Path>) -> io::Result<PathBuf> {
        let dest = self.path.join(CONFIG_COPY_NAME);
        fs::copy(config_path, &dest)?;
        Ok(dest)
    }

    /// Path the generated artifact is written to.
    pub fn result_path(&self) -> PathBuf {
        self.path.join(RESULT_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
