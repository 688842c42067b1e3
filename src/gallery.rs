//! Generated artifacts and the newest-first gallery.

use crate::error::{DimShiftError, Result};
use crate::image::GeneratedImage;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One generated image with its identity in the gallery.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// `"{batch_millis}-{index}"`.
    pub id: String,
    /// Gallery sequence number of the batch this artifact arrived in.
    ///
    /// Zero until the batch is prepended to a [`Gallery`]. Two batches that
    /// settle within the same millisecond share ids but never this number.
    pub batch: u64,
    /// The decoded image.
    pub image: GeneratedImage,
    /// When the dispatch produced this artifact.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Returns the displayable `data:` URI for this artifact.
    pub fn to_data_url(&self) -> String {
        self.image.to_data_url()
    }

    /// File name used when the artifact is written to disk.
    pub fn file_name(&self) -> String {
        format!(
            "dimshift_{}_{}.{}",
            self.batch,
            self.id,
            self.image.format.extension()
        )
    }
}

/// Artifacts produced by one dispatch.
///
/// `failures` is only populated under the settled join policy.
#[derive(Debug, Default)]
pub struct Batch {
    /// Images that came back, in slot order with empty slots removed.
    pub artifacts: Vec<Artifact>,
    /// Errors from the requests that failed.
    pub failures: Vec<DimShiftError>,
}

impl Batch {
    /// Number of artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// True when no request produced an image.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Every artifact generated in a session, newest batch first.
#[derive(Debug, Default)]
pub struct Gallery {
    artifacts: Vec<Artifact>,
    batches: u64,
}

impl Gallery {
    /// Creates an empty gallery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a batch in front of everything already in the gallery.
    ///
    /// Each call stamps its artifacts with the next batch number, starting
    /// at 1. An empty batch still consumes a number.
    pub fn prepend(&mut self, mut batch: Vec<Artifact>) {
        self.batches += 1;
        for artifact in &mut batch {
            artifact.batch = self.batches;
        }
        self.artifacts.splice(0..0, batch);
    }

    /// Number of artifacts across all batches.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// True before the first image arrives.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Artifacts, newest batch first.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    /// Writes every artifact into `dir`, creating it if needed.
    pub fn save_all(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        save_artifacts(self.artifacts.iter(), dir.as_ref())
    }

    /// Writes the `count` newest artifacts into `dir`.
    pub fn save_latest(&self, count: usize, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        save_artifacts(self.artifacts.iter().take(count), dir.as_ref())
    }
}

fn save_artifacts<'a>(
    artifacts: impl Iterator<Item = &'a Artifact>,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    artifacts
        .map(|artifact| {
            let path = dir.join(artifact.file_name());
            artifact.image.save(&path)?;
            tracing::debug!(path = %path.display(), size_bytes = artifact.image.size(), "saved artifact");
            Ok(path)
        })
        .collect()
}
