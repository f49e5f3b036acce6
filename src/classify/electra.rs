use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{DpicsCode, parse_speaker_marker};

pub const DEFAULT_MODEL_DIR: &str = "models/dpics-electra";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";

const TOKENIZER_FILES: &[&str] = &["tokenizer.json", "vocab.txt"];
const WEIGHT_FILES: &[&str] = &["model.safetensors", "pytorch_model.bin"];
const LABEL_MAPPING_FILE: &str = "label_mapping.json";
const MODEL_CONFIG_FILE: &str = "config.json";

/// Settings for the fine-tuned ELECTRA sequence classifier
#[derive(Debug, Clone)]
pub struct ElectraConfig {
    /// Directory holding the exported model artifact
    pub model_dir: PathBuf,
    /// Inference server that hosts the artifact
    pub endpoint: String,
    /// Lines per inference request
    pub batch_size: usize,
    pub request_timeout: Duration,
}

impl Default for ElectraConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            batch_size: 32,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("model directory not found: {0}")]
    MissingModelDir(PathBuf),
    #[error("no {kind} file in {dir} (expected one of: {expected})")]
    MissingArtifact {
        kind: &'static str,
        dir: PathBuf,
        expected: String,
    },
    #[error("no label mapping in {0}: add label_mapping.json or an id2label table in config.json")]
    MissingLabelMapping(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid label mapping in {path}: {source}")]
    InvalidLabelMapping {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("label id `{0}` is not an integer")]
    BadLabelId(String),
    #[error("failed to build inference client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct LabelTable {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

/// Fine-tuned DPICS classifier served over HTTP.
///
/// Loading only validates the local artifact and reads its label table;
/// inference goes to a text-classification server hosting the same
/// artifact, which answers with ranked `{label, score}` lists.
pub struct ElectraClassifier {
    client: Client,
    endpoint: String,
    batch_size: usize,
    id2code: HashMap<usize, DpicsCode>,
    label2id: HashMap<String, usize>,
}

impl ElectraClassifier {
    pub fn load(config: &ElectraConfig) -> Result<Self, ClassifierError> {
        let dir = config.model_dir.as_path();
        if !dir.is_dir() {
            return Err(ClassifierError::MissingModelDir(dir.to_path_buf()));
        }
        require_any(dir, "tokenizer", TOKENIZER_FILES)?;
        require_any(dir, "weights", WEIGHT_FILES)?;

        let id2label = read_label_table(dir)?;
        let mut id2code = HashMap::new();
        let mut label2id = HashMap::new();
        for (id, label) in id2label {
            let id: usize = id
                .trim()
                .parse()
                .map_err(|_| ClassifierError::BadLabelId(id.clone()))?;
            id2code.insert(id, DpicsCode::from_model_label(&label));
            label2id.insert(label, id);
        }
        debug!("ELECTRA label codes: {:?}", id2code);

        let client = Client::builder().timeout(config.request_timeout).build()?;
        info!(
            "Loaded DPICS ELECTRA artifact from {} ({} labels)",
            dir.display(),
            id2code.len()
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            id2code,
            label2id,
        })
    }

    pub fn label_count(&self) -> usize {
        self.id2code.len()
    }

    /// Resolve a predicted label (name or `LABEL_n`) to a DPICS code
    pub fn code_for_label(&self, label: &str) -> DpicsCode {
        let id = self.label2id.get(label).copied().or_else(|| {
            label
                .strip_prefix("LABEL_")
                .and_then(|n| n.parse::<usize>().ok())
        });
        id.and_then(|id| self.id2code.get(&id).copied())
            .unwrap_or(DpicsCode::Other)
    }

    /// Classify lines in batches, returning pairs in input order
    pub async fn classify(&self, lines: &[String]) -> anyhow::Result<Vec<(String, DpicsCode)>> {
        let mut labeled = Vec::with_capacity(lines.len());

        for batch in lines.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|l| normalize_for_model(l)).collect();
            let predictions = self.predict(&inputs).await?;
            if predictions.len() != batch.len() {
                anyhow::bail!(
                    "Inference server returned {} predictions for {} inputs",
                    predictions.len(),
                    batch.len()
                );
            }

            for (line, ranked) in batch.iter().zip(predictions) {
                let code = ranked
                    .into_iter()
                    .max_by(|a, b| a.score.total_cmp(&b.score))
                    .map(|best| self.code_for_label(&best.label))
                    .unwrap_or(DpicsCode::Other);
                labeled.push((line.clone(), code));
            }
        }

        Ok(labeled)
    }

    async fn predict(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<LabelScore>>> {
        let request = PredictRequest {
            inputs,
            truncate: true,
        };

        let response = self
            .client
            .post(format!("{}/predict", self.endpoint))
            .json(&request)
            .send()
            .await
            .context("Failed to reach DPICS inference server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("DPICS inference error: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse DPICS inference response")
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

fn require_any(dir: &Path, kind: &'static str, candidates: &[&str]) -> Result<(), ClassifierError> {
    if candidates.iter().any(|f| dir.join(f).is_file()) {
        Ok(())
    } else {
        Err(ClassifierError::MissingArtifact {
            kind,
            dir: dir.to_path_buf(),
            expected: candidates.join(", "),
        })
    }
}

fn read_table(path: &Path) -> Result<LabelTable, ClassifierError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ClassifierError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ClassifierError::InvalidLabelMapping {
        path: path.to_path_buf(),
        source,
    })
}

/// Prefer label_mapping.json, else the id2label table of config.json
fn read_label_table(dir: &Path) -> Result<HashMap<String, String>, ClassifierError> {
    let mapping = dir.join(LABEL_MAPPING_FILE);
    if mapping.is_file() {
        let table = read_table(&mapping)?;
        if !table.id2label.is_empty() {
            return Ok(table.id2label);
        }
    }

    let config = dir.join(MODEL_CONFIG_FILE);
    if config.is_file() {
        let table = read_table(&config)?;
        if !table.id2label.is_empty() {
            return Ok(table.id2label);
        }
    }

    Err(ClassifierError::MissingLabelMapping(dir.to_path_buf()))
}

/// Rewrite `Parent: ...` style lines into the `[MOM] ...` form used in training
pub fn normalize_for_model(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.starts_with("[MOM]") || trimmed.starts_with("[CHI]") {
        return trimmed.to_string();
    }
    match parse_speaker_marker(trimmed) {
        Some((speaker, text)) => format!("[{}] {}", speaker.code(), text),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn artifact_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    fn config_for(dir: &Path) -> ElectraConfig {
        ElectraConfig {
            model_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    const MAPPING: &str = r#"{"id2label": {"0": "Behavior Description", "1": "Command", "2": "Labeled Praise", "3": "Whining"}}"#;

    #[test]
    fn test_missing_directory() {
        let config = config_for(Path::new("/nonexistent/dpics-electra"));
        assert!(matches!(
            ElectraClassifier::load(&config),
            Err(ClassifierError::MissingModelDir(_))
        ));
    }

    #[test]
    fn test_missing_weights() {
        let dir = artifact_dir(&[("tokenizer.json", "{}"), ("label_mapping.json", MAPPING)]);
        match ElectraClassifier::load(&config_for(dir.path())) {
            Err(ClassifierError::MissingArtifact { kind, .. }) => assert_eq!(kind, "weights"),
            other => panic!("expected missing weights, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_label_mapping() {
        let dir = artifact_dir(&[
            ("vocab.txt", "[PAD]"),
            ("model.safetensors", ""),
            ("config.json", r#"{"model_type": "electra"}"#),
        ]);
        assert!(matches!(
            ElectraClassifier::load(&config_for(dir.path())),
            Err(ClassifierError::MissingLabelMapping(_))
        ));
    }

    #[test]
    fn test_loads_label_mapping() {
        let dir = artifact_dir(&[
            ("tokenizer.json", "{}"),
            ("pytorch_model.bin", ""),
            ("label_mapping.json", MAPPING),
        ]);
        let model = ElectraClassifier::load(&config_for(dir.path())).unwrap();
        assert_eq!(model.label_count(), 4);
        assert_eq!(model.code_for_label("Command"), DpicsCode::Command);
        assert_eq!(model.code_for_label("LABEL_2"), DpicsCode::Praise);
        assert_eq!(model.code_for_label("LABEL_3"), DpicsCode::Other);
        assert_eq!(model.code_for_label("LABEL_99"), DpicsCode::Other);
    }

    #[test]
    fn test_config_json_fallback_and_bad_id() {
        let dir = artifact_dir(&[
            ("tokenizer.json", "{}"),
            ("model.safetensors", ""),
            ("config.json", r#"{"id2label": {"0": "Question"}}"#),
        ]);
        let model = ElectraClassifier::load(&config_for(dir.path())).unwrap();
        assert_eq!(model.code_for_label("Question"), DpicsCode::Question);

        let dir = artifact_dir(&[
            ("tokenizer.json", "{}"),
            ("model.safetensors", ""),
            ("label_mapping.json", r#"{"id2label": {"zero": "Question"}}"#),
        ]);
        assert!(matches!(
            ElectraClassifier::load(&config_for(dir.path())),
            Err(ClassifierError::BadLabelId(_))
        ));
    }

    #[test]
    fn test_normalize_for_model() {
        assert_eq!(normalize_for_model("Parent: How are you?"), "[MOM] How are you?");
        assert_eq!(normalize_for_model(" child: fine "), "[CHI] fine");
        assert_eq!(normalize_for_model("[CHI] already"), "[CHI] already");
        assert_eq!(normalize_for_model("no speaker"), "no speaker");
    }
}
