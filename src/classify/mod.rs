//! DPICS line classification.
//!
//! [`DpicsClassifier`] is the one entry point: it prefers the fine-tuned
//! ELECTRA classifier and falls back to prompt-based labeling (which itself
//! falls back to keyword heuristics). It never fails; worst case every line
//! gets a heuristic code.

pub mod electra;
pub mod heuristic;
pub mod prompted;

pub use electra::*;
pub use prompted::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::llm::CompletionClient;
use crate::models::DpicsCode;

/// Classifier selection and ELECTRA artifact settings
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Try the ELECTRA classifier before prompt labeling
    pub use_electra: bool,
    pub electra: ElectraConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            use_electra: true,
            electra: ElectraConfig::default(),
        }
    }
}

impl ClassifierConfig {
    /// Read USE_DPICS_ELECTRA, DPICS_ELECTRA_MODEL_PATH and DPICS_ELECTRA_ENDPOINT
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(flag) = lookup("USE_DPICS_ELECTRA") {
            config.use_electra = !matches!(
                flag.trim().to_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            );
        }
        if let Some(path) = lookup("DPICS_ELECTRA_MODEL_PATH").filter(|p| !p.trim().is_empty()) {
            config.electra.model_dir = PathBuf::from(path);
        }
        if let Some(endpoint) = lookup("DPICS_ELECTRA_ENDPOINT").filter(|e| !e.trim().is_empty()) {
            config.electra.endpoint = endpoint;
        }
        if let Some(secs) =
            lookup("DPICS_ELECTRA_TIMEOUT_SECS").and_then(|s| s.trim().parse().ok())
        {
            config.electra.request_timeout = Duration::from_secs(secs);
        }

        config
    }
}

/// Lazily loaded, shared ELECTRA classifier.
///
/// The first successful load is kept for the life of the handle; failed
/// loads are not cached. `reset` drops the loaded model so the next use
/// reloads it.
#[derive(Default)]
pub struct ElectraHandle {
    inner: Mutex<Option<Arc<ElectraClassifier>>>,
}

impl ElectraHandle {
    pub async fn get_or_load(
        &self,
        config: &ElectraConfig,
    ) -> Result<Arc<ElectraClassifier>, ClassifierError> {
        let mut guard = self.inner.lock().await;
        if let Some(model) = guard.as_ref() {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(ElectraClassifier::load(config)?);
        *guard = Some(Arc::clone(&model));
        Ok(model)
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    pub async fn reset(&self) {
        *self.inner.lock().await = None;
    }
}

/// The classification adapter used by labeling and annotation stages
pub struct DpicsClassifier {
    config: ClassifierConfig,
    electra: ElectraHandle,
    prompted: PromptClassifier,
}

impl DpicsClassifier {
    pub fn new(config: ClassifierConfig, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            config,
            electra: ElectraHandle::default(),
            prompted: PromptClassifier::new(client),
        }
    }

    pub fn electra_handle(&self) -> &ElectraHandle {
        &self.electra
    }

    /// Label each line; the result follows input order for the ELECTRA
    /// and heuristic paths, and whatever the model returned otherwise
    pub async fn classify(&self, lines: &[String]) -> Vec<(String, DpicsCode)> {
        if lines.is_empty() {
            return Vec::new();
        }

        if self.config.use_electra {
            match self.classify_with_electra(lines).await {
                Ok(labels) => {
                    info!("Labeled {} lines with ELECTRA classifier", labels.len());
                    return labels;
                }
                Err(e) => warn!("ELECTRA classifier unavailable, using prompt labeling: {:#}", e),
            }
        }

        self.prompted.classify(lines).await
    }

    async fn classify_with_electra(
        &self,
        lines: &[String],
    ) -> anyhow::Result<Vec<(String, DpicsCode)>> {
        let model = self.electra.get_or_load(&self.config.electra).await?;
        model.classify(lines).await
    }
}
