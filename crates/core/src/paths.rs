//! Per-job filesystem layout.
//!
//! Every job owns one folder under the storage root, named after its id:
//!
//! ```text
//! <root>/<job_id>/input/target.tif    uploaded raster
//! <root>/<job_id>/output/target.tif   processed raster
//! <root>/<job_id>/temp/               runner scratch space
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::job::JobId;

/// File name used for both the input and the output artifact.
pub const ARTIFACT_FILE_NAME: &str = "target.tif";

const INPUT_DIR: &str = "input";
const OUTPUT_DIR: &str = "output";
const TEMP_DIR: &str = "temp";

/// Root directory that holds all job folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoot(PathBuf);

impl StorageRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn job(&self, id: JobId) -> JobPaths {
        JobPaths::new(&self.0, id)
    }
}

/// Paths derived from a job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub id: JobId,
    pub folder: PathBuf,
    pub input_dir: PathBuf,
    pub input_file: PathBuf,
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
    pub temp_dir: PathBuf,
}

impl JobPaths {
    pub fn new(root: &Path, id: JobId) -> Self {
        let folder = root.join(id.to_string());
        let input_dir = folder.join(INPUT_DIR);
        let output_dir = folder.join(OUTPUT_DIR);
        Self {
            id,
            input_file: input_dir.join(ARTIFACT_FILE_NAME),
            output_file: output_dir.join(ARTIFACT_FILE_NAME),
            temp_dir: folder.join(TEMP_DIR),
            input_dir,
            output_dir,
            folder,
        }
    }

    /// Create the input, output and scratch directories.
    pub async fn prepare(&self) -> io::Result<()> {
        for dir in [&self.input_dir, &self.output_dir, &self.temp_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Whether the processed artifact exists.
    pub async fn output_present(&self) -> bool {
        tokio::fs::try_exists(&self.output_file)
            .await
            .unwrap_or(false)
    }

    /// Delete the job folder and everything in it.
    ///
    /// A folder that is already gone counts as removed.
    pub async fn remove(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.folder).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
