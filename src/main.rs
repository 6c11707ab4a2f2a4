//! stateful CLI: check, compile, run and grade stateful questions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};

use stateful::cas::http::HttpCasEvaluator;
use stateful::compile::{CacheRegistry, SessionCompiler};
use stateful::config::EngineConfig;
use stateful::engine::{Engine, ExecutionMode};
use stateful::grade::{self, AttemptHistory};
use stateful::input::Response;
use stateful::question::Question;
use stateful::state::AttemptSnapshot;

#[derive(Parser)]
#[command(name = "stateful", version, about = "Stateful multi-scene question engine")]
struct Cli {
    /// Engine config file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a question definition and list its scenes.
    Check {
        /// Question file (TOML, or JSON with a `.json` extension).
        question: PathBuf,
    },

    /// Print the compiled session cache of a question as JSON.
    Compile {
        question: PathBuf,
    },

    /// Grade a recorded attempt history.
    Grade {
        question: PathBuf,
        /// Attempt history JSON: a list of `{scene, attempts}` visits.
        history: PathBuf,
        /// Ignore accumulated penalties.
        #[arg(long)]
        no_penalties: bool,
    },

    /// Start an attempt and write its state file.
    Start {
        question: PathBuf,
        /// Attempt state file to create.
        #[arg(long)]
        state: PathBuf,
        /// Fixed random seed.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Submit a response against a saved attempt and update its state file.
    Submit {
        question: PathBuf,
        #[arg(long)]
        state: PathBuf,
        /// Response field as `name=value`; repeatable.
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        /// Include PRT feedback in the output.
        #[arg(long)]
        feedback: bool,
        /// Evaluate without committing scene transitions.
        #[arg(long)]
        preview: bool,
    },
}

/// What `start` and `submit` persist between invocations.
#[derive(Debug, Serialize, Deserialize)]
struct SavedAttempt {
    snapshot: AttemptSnapshot,
    #[serde(default)]
    history: AttemptHistory,
}

fn parse_field(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{s}`"))?;
    Ok((name.trim().to_string(), value.to_string()))
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { question } => {
            let question = Question::load(&question)?;
            let cache = SessionCompiler::compile(&question)?;
            println!(
                "Question \"{}\": {} scenes, {} state variables, max mark {}, PRT value {}, {} compiled entries",
                question.name,
                question.scenes.len(),
                question.state_variables.len(),
                question.default_mark,
                question.total_prt_value(),
                cache.len()
            );
            for sv in &question.state_variables {
                println!("  state {} {} = {}", sv.id, sv.name, sv.initial_value);
            }
            for scene in &question.scenes {
                let marker = if scene.name == question.entry_scene {
                    " (entry)"
                } else if scene.is_end_scene() {
                    " (end)"
                } else {
                    ""
                };
                println!(
                    "  {}{marker}: {} inputs, {} PRTs",
                    scene.name,
                    scene.inputs.len(),
                    scene.prts.len()
                );
            }
        }

        Commands::Compile { question } => {
            let question = Question::load(&question)?;
            let cache = SessionCompiler::compile(&question)?;
            println!("{}", serde_json::to_string_pretty(&cache).into_diagnostic()?);
        }

        Commands::Grade {
            question,
            history,
            no_penalties,
        } => {
            let question = Question::load(&question)?;
            let content = std::fs::read_to_string(&history).into_diagnostic()?;
            let history: AttemptHistory = serde_json::from_str(&content).into_diagnostic()?;
            let report = grade::grade_report(&question, history.visits(), !no_penalties)?;
            for (key, aggregate) in &report.aggregates {
                println!("  {key}: {aggregate:.4}");
            }
            println!(
                "Weighted sum {:.4} / max mark {} = {:.4}",
                report.weighted_sum, report.max_mark, report.total
            );
        }

        Commands::Start {
            question,
            state,
            seed,
        } => {
            let mut engine = build_engine(&question, &config)?;
            let seed = engine.start_attempt(seed)?;
            save_attempt(&state, &engine)?;
            println!("Attempt started with seed {seed}.");
            if let Some(text) = engine.scene_text() {
                println!("{text}");
            }
        }

        Commands::Submit {
            question,
            state,
            fields,
            feedback,
            preview,
        } => {
            let content = std::fs::read_to_string(&state).into_diagnostic()?;
            let saved: SavedAttempt = serde_json::from_str(&content).into_diagnostic()?;
            let mut engine =
                build_engine(&question, &config)?.with_snapshot(&saved.snapshot, saved.history);

            let response: Response = fields.into_iter().collect();
            let mode = if preview {
                ExecutionMode::Preview
            } else {
                ExecutionMode::Normal
            };
            let result = engine.process_input(&response, feedback, mode)?;
            save_attempt(&state, &engine)?;
            println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);
        }
    }

    Ok(())
}

fn build_engine(question: &Path, config: &EngineConfig) -> Result<Engine> {
    let question = Arc::new(Question::load(question)?);
    let cache = CacheRegistry::new().get_or_compile(&question)?;
    let cas = Arc::new(HttpCasEvaluator::new(
        config.cas.url.clone(),
        config.cas.timeout(),
    ));
    Ok(Engine::new(question, cache, cas, config.clone()))
}

fn save_attempt(path: &Path, engine: &Engine) -> Result<()> {
    let saved = SavedAttempt {
        snapshot: engine.snapshot(),
        history: engine.history().clone(),
    };
    let json = serde_json::to_string_pretty(&saved).into_diagnostic()?;
    std::fs::write(path, json).into_diagnostic()
}
