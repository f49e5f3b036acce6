use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::debug;

/// Default root for dataset files
pub const DEFAULT_DATA_PATH: &str = "data";

/// Source of today's dataset record
pub trait DatasetLookup: Send + Sync {
    fn today(&self) -> Result<Value>;
}

/// Reads `{root}/ddl/tdl.json`; a missing file is an empty object
#[derive(Debug, Clone)]
pub struct JsonFileDataset {
    root: PathBuf,
}

impl JsonFileDataset {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from DATA_PATH, else [`DEFAULT_DATA_PATH`]
    pub fn from_env() -> Self {
        let root = std::env::var("DATA_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_PATH.to_string());
        Self::new(root)
    }

    pub fn path(&self) -> PathBuf {
        self.root.join("ddl").join("tdl.json")
    }
}

impl DatasetLookup for JsonFileDataset {
    fn today(&self) -> Result<Value> {
        let path = self.path();
        if !path.exists() {
            debug!("No dataset file at {:?}", path);
            return Ok(json!({}));
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse dataset: {:?}", path))
    }
}
