pub mod align;
pub mod classify;
pub mod config;
pub mod graph;
pub mod io;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod stages;
pub mod state;

pub use classify::{ClassifierConfig, DpicsClassifier};
pub use config::AnalysisConfig;
pub use graph::{ExecutorConfig, GraphError, PipelineError};
pub use io::{
    DatasetLookup, DialogueInput, JsonFileDataset, ReportText, parse_json_arg, read_dialogue_file,
    write_json,
};
pub use llm::{CompletionClient, ProviderConfig, build_client};
pub use models::{DpicsCode, FinalResult, Pattern, Severity, Speaker};
pub use pipeline::{
    AnalysisContext, AnalysisInput, advice_graph, analysis_graph, analyze_dialogue, legacy_advice,
};
pub use state::AnalysisState;
