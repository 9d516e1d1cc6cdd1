//! Particle snapshots: one JSON file per step, named
//! `<header><step>.json` with a zero-padded step index.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::SNAPSHOT_STEP_DIGITS;
use crate::error::Result;
use crate::particle::ParticleRecord;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: u64,
    pub time: f64,
    pub particles: Vec<ParticleRecord>,
}

/// File name for a step, e.g. `fluid_00042.json`.
pub fn snapshot_file_name(header: &str, step: u64) -> String {
    format!("{}{:0width$}.json", header, step, width = SNAPSHOT_STEP_DIGITS)
}

impl Snapshot {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Writes numbered snapshots into a directory.
#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    dir: PathBuf,
    header: String,
}

impl SnapshotWriter {
    /// Create the writer, making `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>, header: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            header: header.into(),
        })
    }

    pub fn path_for(&self, step: u64) -> PathBuf {
        self.dir.join(snapshot_file_name(&self.header, step))
    }

    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let path = self.path_for(snapshot.step);
        snapshot.save(&path)?;
        log::debug!(
            "wrote {} particles to {}",
            snapshot.particles.len(),
            path.display()
        );
        Ok(path)
    }

    pub fn read(&self, step: u64) -> Result<Snapshot> {
        Snapshot::load(&self.path_for(step))
    }
}
