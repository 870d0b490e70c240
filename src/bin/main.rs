use clap::{ArgAction, Parser, Subcommand};
use finqa_planrag::{
    agent::{index_document, Backends, Orchestrator},
    config::Settings,
    dataset::{get_turn_gold, get_turn_question, load_records, ConvFinQARecord},
    execution::ExecutionConfig,
    models::{ExecutionState, MemorySlots, Verdict},
    numeric::numeric_match,
};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

/// Plan-and-retrieve question answering over ConvFinQA records.
#[derive(Parser, Debug)]
#[command(name = "planrag", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one dialogue turn of a record
    Chat {
        record_id: String,
        /// Dataset path (defaults to DATASET_PATH)
        #[arg(long)]
        data: Option<String>,
        /// Dialogue turn index (default: last)
        #[arg(long)]
        turn: Option<usize>,
        /// Initial memory JSON, e.g. '{"entity":"Apple","period":"2020"}'
        #[arg(long)]
        memory: Option<String>,
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        show_snippets: bool,
        #[arg(long, default_value_t = false, action = ArgAction::Set)]
        show_logs: bool,
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        show_validation: bool,
    },
    /// Last-turn numeric match over the first N records
    Eval {
        #[arg(long)]
        data: Option<String>,
        #[arg(short, long, default_value_t = 50)]
        n: usize,
    },
    /// Ask several questions against one record, carrying memory
    Repl {
        record_id: String,
        #[arg(long)]
        data: Option<String>,
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        show_validation: bool,
    },
}

/// Failure with the process exit code it maps to
struct CliError {
    code: u8,
    message: String,
}

impl CliError {
    fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<finqa_planrag::error::OrchestrationError> for CliError {
    fn from(e: finqa_planrag::error::OrchestrationError) -> Self {
        Self::new(2, e.to_string())
    }
}

type CliResult = std::result::Result<(), CliError>;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let result = match Settings::from_env() {
        Ok(settings) => run(cli.command, settings).await,
        Err(e) => Err(CliError::new(2, e.to_string())),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.message);
            ExitCode::from(e.code)
        }
    }
}

async fn run(command: Command, settings: Settings) -> CliResult {
    let backends = Backends::from_settings(&settings)?;
    let config = ExecutionConfig::from_settings(&settings);

    match command {
        Command::Chat {
            record_id,
            data,
            turn,
            memory,
            show_snippets,
            show_logs,
            show_validation,
        } => {
            let records = load(data.as_deref().unwrap_or(&settings.dataset_path))?;
            let record = find(&records, &record_id)?;

            let question = get_turn_question(record, turn);
            if question.is_empty() {
                return Err(CliError::new(1, "No question available for this record/turn."));
            }

            let memory = parse_memory(memory.as_deref());
            println!("Question: {}", question);
            if !memory.is_empty() {
                println!("Initial memory: {:?}", memory);
            }

            let orchestrator = orchestrator(record, &backends, &config).await?;
            let state = orchestrator.run(&question, memory).await;

            print_turn(&state, show_snippets, show_validation);

            if let Some(gold) = get_turn_gold(record, turn) {
                let ok = numeric_match(state.final_answer.as_deref().unwrap_or_default(), &gold);
                println!("Gold: {}    Match: {}", gold, if ok { "yes" } else { "no" });
            }

            if show_logs {
                println!("Logs:");
                for line in &state.logs {
                    println!("  - {}", line);
                }
            }
            Ok(())
        }

        Command::Eval { data, n } => {
            let records = load(data.as_deref().unwrap_or(&settings.dataset_path))?;
            let (mut total, mut hits) = (0usize, 0usize);

            for record in records.iter().take(n) {
                let question = get_turn_question(record, None);
                let Some(gold) = get_turn_gold(record, None) else {
                    continue;
                };
                if question.is_empty() {
                    continue;
                }

                let orchestrator = orchestrator(record, &backends, &config).await?;
                let state = orchestrator.run(&question, MemorySlots::new()).await;

                total += 1;
                if numeric_match(state.final_answer.as_deref().unwrap_or_default(), &gold) {
                    hits += 1;
                }
                info!(record_id = %record.id, total, hits, "Evaluated record");
            }

            if total == 0 {
                return Err(CliError::new(1, "No evaluable examples found."));
            }
            println!(
                "Numeric@1: {}/{} = {:.2}%",
                hits,
                total,
                hits as f64 / total as f64 * 100.0
            );
            Ok(())
        }

        Command::Repl {
            record_id,
            data,
            show_validation,
        } => {
            let records = load(data.as_deref().unwrap_or(&settings.dataset_path))?;
            let record = find(&records, &record_id)?;
            println!("Loaded record: {}", record.id);

            let orchestrator = orchestrator(record, &backends, &config).await?;
            let mut memory = MemorySlots::new();
            let stdin = io::stdin();

            loop {
                print!("you> ");
                io::stdout().flush().ok();

                let mut line = String::new();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => {
                        println!();
                        break;
                    }
                    Ok(_) => {}
                }

                let question = line.trim();
                if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
                    break;
                }
                if question.is_empty() {
                    continue;
                }

                let state = orchestrator.run(question, memory).await;
                memory = state.memory.clone();

                println!("bot> {}", state.final_answer.as_deref().unwrap_or_default());
                if show_validation {
                    if let Some(v) = &state.validation {
                        println!(
                            "   validator: {} | conf={} | reason={}",
                            v.verdict, v.confidence, v.rationale
                        );
                    }
                }
            }
            Ok(())
        }
    }
}

fn load(path: &str) -> std::result::Result<Vec<ConvFinQARecord>, CliError> {
    if !std::path::Path::new(path).exists() {
        return Err(CliError::new(2, format!("Dataset not found at {}", path)));
    }
    Ok(load_records(path)?)
}

fn find<'a>(records: &'a [ConvFinQARecord], record_id: &str) -> std::result::Result<&'a ConvFinQARecord, CliError> {
    records
        .iter()
        .find(|r| r.id == record_id)
        .ok_or_else(|| CliError::new(2, format!("Unknown record_id: {}", record_id)))
}

async fn orchestrator(
    record: &ConvFinQARecord,
    backends: &Backends,
    config: &ExecutionConfig,
) -> std::result::Result<Orchestrator, CliError> {
    let index = index_document(&record.id, &record.doc, backends.embedder.clone()).await?;
    Ok(Orchestrator::new(
        backends.model.clone(),
        Arc::new(index),
        config.clone(),
    ))
}

/// Object JSON into slots; anything else is ignored with a warning
fn parse_memory(raw: Option<&str>) -> MemorySlots {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return MemorySlots::new();
    };

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
        _ => {
            warn!("--memory was not valid JSON; ignoring");
            eprintln!("Warning: --memory was not valid JSON; ignoring.");
            MemorySlots::new()
        }
    }
}

fn print_turn(state: &ExecutionState, show_snippets: bool, show_validation: bool) {
    println!("\n=== SUB-ANSWERS ===");
    for (id, answer) in &state.answers {
        println!("  {:<6} {}", id, answer);
    }

    if show_snippets {
        println!("\nTop snippets (by node):");
        for (id, snippets) in &state.retrieved {
            println!("  {}", id);
            for snippet in snippets.iter().take(3) {
                println!("    - {}", snippet);
            }
        }
    }

    println!("\nFinal: {}", state.final_answer.as_deref().unwrap_or_default());

    if show_validation {
        if let Some(v) = &state.validation {
            println!(
                "Validator: {} | conf={} | reason={}",
                v.verdict, v.confidence, v.rationale
            );
            if v.verdict == Verdict::Fail && !v.corrected.is_empty() {
                println!("Corrected Final: {}", v.corrected);
            }
        }
    }

    if !state.memory.is_empty() {
        println!("Memory snapshot: {:?}", state.memory);
    }
}
