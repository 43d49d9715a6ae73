//! Presample persistence.
//!
//! Serializes an aggregate sample matrix plus its row index to a directory
//! under a deterministic naming scheme:
//!
//! ```text
//! <id>.0.indices    bincode-encoded Vec<(RecordKey, RecordKey)>
//! <id>.0.samples    bincode-encoded SampleMatrix
//! <id>.meta.json    id, shape and creation timestamp
//! ```

use crate::{EngineError, SampleMatrix};
use chrono::{DateTime, Utc};
use landbalancer_store::RecordKey;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar metadata written next to the index/sample files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresampleMeta {
    pub id: String,
    pub rows: usize,
    pub cols: usize,
    pub created: DateTime<Utc>,
}

/// Write `samples` and `indices` to `outdir` (default: a fresh directory
/// under the OS temp dir) under identifier `id_` (default: a random UUID).
/// Returns the resolved identifier and directory path.
pub fn create_presamples(
    samples: &SampleMatrix,
    indices: &[(RecordKey, RecordKey)],
    id_: Option<&str>,
    outdir: Option<&Path>,
) -> Result<(String, PathBuf), EngineError> {
    if samples.rows() == 0 {
        return Err(EngineError::EmptyMatrix);
    }
    if indices.len() != samples.rows() {
        return Err(EngineError::ShapeMismatch {
            rows: samples.rows(),
            indices: indices.len(),
        });
    }

    let id = match id_ {
        Some(id) => id.to_string(),
        None => uuid::Uuid::new_v4().simple().to_string(),
    };
    let dir = match outdir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::temp_dir()
            .join("landbalancer-presamples")
            .join(&id),
    };
    fs::create_dir_all(&dir)?;

    fs::write(
        dir.join(format!("{id}.0.indices")),
        bincode::serialize(indices)?,
    )?;
    fs::write(
        dir.join(format!("{id}.0.samples")),
        bincode::serialize(samples)?,
    )?;
    let meta = PresampleMeta {
        id: id.clone(),
        rows: samples.rows(),
        cols: samples.cols(),
        created: Utc::now(),
    };
    let meta_bytes = serde_json::to_vec_pretty(&meta)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(dir.join(format!("{id}.meta.json")), meta_bytes)?;

    tracing::debug!(%id, path = %dir.display(), rows = samples.rows(), "wrote presamples");
    Ok((id, dir))
}

pub fn load_presample_indices(path: &Path) -> Result<Vec<(RecordKey, RecordKey)>, EngineError> {
    Ok(bincode::deserialize(&fs::read(path)?)?)
}

pub fn load_presample_samples(path: &Path) -> Result<SampleMatrix, EngineError> {
    Ok(bincode::deserialize(&fs::read(path)?)?)
}

pub fn load_presample_meta(path: &Path) -> Result<PresampleMeta, EngineError> {
    let meta: PresampleMeta = serde_json::from_slice(&fs::read(path)?)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(meta)
}
