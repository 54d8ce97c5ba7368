//! Report sinks.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Destination for a serialized report.
pub trait ReportSink {
    fn write(&self, bytes: &[u8]) -> Result<()>;
}

/// Writes the report to a file, replacing any previous one in a single step.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

impl ReportSink for FileSink {
    fn write(&self, bytes: &[u8]) -> Result<()> {
        let staging = self.staging_path();

        let mut file = std::fs::File::create(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        drop(file);

        std::fs::rename(&staging, &self.path).with_context(|| {
            format!("Failed to move report into place at {}", self.path.display())
        })?;
        Ok(())
    }
}
