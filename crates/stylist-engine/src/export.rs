use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use stylist_contracts::history::SaveTarget;

use crate::codec::decode_payload;

/// Writes exported results as files under one directory.
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SaveTarget for DirectorySaver {
    fn save(&mut self, data_url: &str, filename: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let bytes = decode_payload(data_url)?;
        let path = self.dir.join(filename);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
