use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use dialogue_coach::{
    AnalysisConfig, AnalysisContext, AnalysisInput, ReportText, analyze_dialogue, legacy_advice,
    parse_json_arg, read_dialogue_file, write_json,
};

#[derive(Parser)]
#[command(name = "dialogue-coach")]
#[command(author, version, about = "Parent-child dialogue coaching pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis and print or save the report
    Analyze {
        /// Dialogue file: plain text, or a JSON array of strings / {speaker, text} objects
        #[arg(short, long)]
        input: PathBuf,

        /// Challenge specification (inline JSON or a JSON file)
        #[arg(long)]
        challenge: Option<String>,

        /// Metadata object copied into the result (inline JSON or a JSON file)
        #[arg(long)]
        meta: Option<String>,

        /// Output file for the full result (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output file for the human-readable report (text)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Maximum number of stages running at once
        #[arg(long, default_value = "5")]
        max_concurrency: usize,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Produce free-text parenting advice for a dialogue
    Advice {
        /// Dialogue file (plain text)
        #[arg(short, long)]
        input: PathBuf,

        /// Extra context about the conversation
        #[arg(short, long)]
        context: Option<String>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            challenge,
            meta,
            output,
            report,
            max_concurrency,
            verbose,
        } => {
            setup_logging(verbose);
            run_analysis(input, challenge, meta, output, report, max_concurrency).await
        }
        Commands::Advice {
            input,
            context,
            verbose,
        } => {
            setup_logging(verbose);
            run_advice(input, context).await
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn run_analysis(
    input: PathBuf,
    challenge: Option<String>,
    meta: Option<String>,
    output: Option<PathBuf>,
    report: Option<PathBuf>,
    max_concurrency: usize,
) -> Result<()> {
    info!("Loading dialogue from {:?}", input);
    let dialogue = read_dialogue_file(&input).context("Failed to read input dialogue")?;

    let mut request = AnalysisInput::new(dialogue);
    request.challenge_spec = challenge
        .as_deref()
        .map(parse_json_arg)
        .transpose()
        .context("Failed to parse --challenge")?;
    if let Some(meta) = meta.as_deref() {
        match parse_json_arg(meta).context("Failed to parse --meta")? {
            Value::Object(map) => request.meta = map,
            other => bail!("--meta must be a JSON object, got {}", other),
        }
    }

    let mut config = AnalysisConfig::default();
    config.executor.max_concurrency = max_concurrency;
    let ctx = AnalysisContext::from_env(config)?;

    let result = analyze_dialogue(&ctx, request).await?;
    info!(
        "Complete: {} patterns, style {}, challenge score {}",
        result.patterns.len(),
        result.style_analysis.style_type,
        result.challenge_eval.score
    );

    if let Some(path) = &output {
        write_json(&result, path)?;
        info!("Result written to {:?}", path);
    }

    let text = ReportText::new(&result);
    match &report {
        Some(path) => {
            text.write_file(path)?;
            info!("Report written to {:?}", path);
        }
        None if output.is_none() => println!("{}", text.format()),
        None => {}
    }

    Ok(())
}

async fn run_advice(input: PathBuf, context: Option<String>) -> Result<()> {
    info!("Loading dialogue from {:?}", input);
    let dialogue = read_dialogue_file(&input).context("Failed to read input dialogue")?;

    let ctx = AnalysisContext::from_env(AnalysisConfig::default())?;
    let advice = legacy_advice(&ctx, &dialogue.to_text(), context).await?;

    println!("{}", advice);
    Ok(())
}
