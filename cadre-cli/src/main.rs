//! Cadre command-line interface
//!
//! Exit codes: 0 complete, 2 awaiting human input at termination, 3 fatal
//! error, 4 cancelled, 5 configuration error.

mod feedback;
mod llm;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadre_core::{
    Error, Flow, Phase, RelationalMetrics, RunOptions, RunOutcome, StandardCrews, StateStore,
};
use cadre_db::Database;

use feedback::StdinFeedback;
use llm::CommandLlm;

const EXIT_COMPLETE: u8 = 0;
const EXIT_AWAITING_HUMAN: u8 = 2;
const EXIT_FATAL: u8 = 3;
const EXIT_CANCELLED: u8 = 4;
const EXIT_CONFIG: u8 = 5;

#[derive(Parser)]
#[command(name = "cadre", about = "Autonomous software-delivery orchestrator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, clap::Args)]
struct RunArgs {
    /// Options file (TOML); flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent command used as the LLM endpoint
    #[arg(long, default_value = "claude")]
    llm_cmd: String,

    /// Extra arguments for the agent command
    #[arg(long)]
    llm_arg: Vec<String>,

    /// Directory for snapshots, logs, and workspaces
    #[arg(long)]
    persist_dir: Option<PathBuf>,

    /// Maximum retries per phase
    #[arg(long)]
    max_retries: Option<u32>,

    /// Disable the associative memory
    #[arg(long)]
    no_memory: bool,

    /// Minimum acceptable test coverage (0..=1)
    #[arg(long)]
    coverage_threshold: Option<f64>,

    /// Seconds to wait for human feedback before the default action
    #[arg(long)]
    feedback_timeout: Option<u64>,

    /// Never prompt; park instead of waiting for input
    #[arg(long)]
    non_interactive: bool,

    /// Skip the cross-session metrics store
    #[arg(long)]
    no_metrics: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a new project from a description
    Run {
        /// Natural-language project description
        description: String,

        #[command(flatten)]
        args: RunArgs,
    },
    /// Resume a run from its last snapshot
    Resume {
        /// Project id of the parked or interrupted run
        project_id: uuid::Uuid,

        /// Response to the pending feedback request, if any
        #[arg(long)]
        response: Option<String>,

        #[command(flatten)]
        args: RunArgs,
    },
    /// Show the persisted status of a run
    Status {
        project_id: uuid::Uuid,

        #[arg(long, default_value = ".cadre")]
        persist_dir: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cadre={default_level},cadre_core={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_options(args: &RunArgs) -> Result<RunOptions, Error> {
    let mut options = match &args.config {
        Some(path) => RunOptions::load_from_file(path)?,
        None => RunOptions::default(),
    };
    if let Some(ref dir) = args.persist_dir {
        options.persist_dir = dir.clone();
    }
    if let Some(max_retries) = args.max_retries {
        options.max_retries = max_retries;
    }
    if args.no_memory {
        options.memory_enabled = false;
    }
    if let Some(threshold) = args.coverage_threshold {
        options.coverage_threshold = threshold;
    }
    if let Some(secs) = args.feedback_timeout {
        options.feedback_timeout_secs = Some(secs);
    }
    options.validate()?;
    Ok(options)
}

fn build_flow(args: &RunArgs) -> Result<Flow, Error> {
    let options = build_options(args)?;
    let llm = Arc::new(
        CommandLlm::new(args.llm_cmd.clone())
            .with_args(args.llm_arg.clone())
            .with_timeout(Duration::from_secs(300)),
    );
    // The standard crews give every worker a workspace file store rooted at
    // the run's workspace under persist_dir, plus any extra configured
    // roots; all generated-file writes go through its validation.
    let crews = StandardCrews::new(llm, options.clone()).into_phase_crews();
    let mut flow = Flow::new(options, crews)?;
    if !args.non_interactive {
        flow = flow.with_feedback_handler(Arc::new(StdinFeedback::new()));
    }
    if !args.no_metrics {
        match Database::open() {
            Ok(db) => flow = flow.with_metrics(Arc::new(RelationalMetrics::new(db))),
            Err(error) => tracing::warn!(%error, "metrics store unavailable, continuing without it"),
        }
    }
    Ok(flow)
}

fn install_cancel_on_ctrl_c(flow: &Flow) {
    let flag = flow.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            flag.cancel();
        }
    });
}

fn exit_code_for(outcome: &RunOutcome) -> u8 {
    if outcome.cancelled {
        return EXIT_CANCELLED;
    }
    match outcome.final_phase {
        Phase::Complete => EXIT_COMPLETE,
        Phase::AwaitingHuman => EXIT_AWAITING_HUMAN,
        _ => EXIT_FATAL,
    }
}

fn exit_code_for_error(error: &Error) -> u8 {
    match error {
        Error::Config(_) => EXIT_CONFIG,
        Error::Cancelled => EXIT_CANCELLED,
        _ => EXIT_FATAL,
    }
}

fn report_outcome(outcome: &RunOutcome) {
    println!("{}", outcome.state.summary());
    if let Some(ref request) = outcome.pending_request {
        println!(
            "awaiting input: {} (resume with `cadre resume {} --response ...`)",
            request.question, outcome.project_id
        );
    }
}

async fn run_command(command: Command) -> u8 {
    match command {
        Command::Run { description, args } => {
            let mut flow = match build_flow(&args) {
                Ok(flow) => flow,
                Err(error) => {
                    eprintln!("error: {error}");
                    return exit_code_for_error(&error);
                }
            };
            install_cancel_on_ctrl_c(&flow);
            match flow.run(&description).await {
                Ok(outcome) => {
                    report_outcome(&outcome);
                    exit_code_for(&outcome)
                }
                Err(error) => {
                    eprintln!("error: {error}");
                    exit_code_for_error(&error)
                }
            }
        }
        Command::Resume {
            project_id,
            response,
            args,
        } => {
            let mut flow = match build_flow(&args) {
                Ok(flow) => flow,
                Err(error) => {
                    eprintln!("error: {error}");
                    return exit_code_for_error(&error);
                }
            };
            install_cancel_on_ctrl_c(&flow);
            let result = match response {
                Some(response) => flow.resume_with(&project_id, response).await,
                None => flow.resume(&project_id).await,
            };
            match result {
                Ok(outcome) => {
                    report_outcome(&outcome);
                    exit_code_for(&outcome)
                }
                Err(error) => {
                    eprintln!("error: {error}");
                    exit_code_for_error(&error)
                }
            }
        }
        Command::Status {
            project_id,
            persist_dir,
        } => {
            let store = StateStore::new(persist_dir);
            match store.load(&project_id) {
                Ok(state) => {
                    println!("{}", state.summary());
                    for transition in &state.transitions {
                        println!(
                            "  {} -> {} at {} ({})",
                            transition.from, transition.to, transition.timestamp, transition.reason
                        );
                    }
                    if !state.errors.is_empty() {
                        println!("errors:");
                        for error in &state.errors {
                            println!("  [{}] {}: {}", error.phase, error.kind, error.message);
                        }
                    }
                    EXIT_COMPLETE
                }
                Err(error) => {
                    eprintln!("error: {error}");
                    exit_code_for_error(&error)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    ExitCode::from(run_command(cli.command).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::ProjectState;

    fn outcome(final_phase: Phase, cancelled: bool) -> RunOutcome {
        let state = ProjectState::new("x");
        RunOutcome {
            project_id: state.project_id,
            final_phase,
            state,
            pending_request: None,
            cancelled,
        }
    }

    #[test]
    fn test_exit_codes_match_contract() {
        assert_eq!(exit_code_for(&outcome(Phase::Complete, false)), 0);
        assert_eq!(exit_code_for(&outcome(Phase::AwaitingHuman, false)), 2);
        assert_eq!(exit_code_for(&outcome(Phase::Error, false)), 3);
        assert_eq!(exit_code_for(&outcome(Phase::Error, true)), 4);
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(exit_code_for_error(&Error::Config("bad".into())), 5);
        assert_eq!(exit_code_for_error(&Error::Cancelled), 4);
        assert_eq!(exit_code_for_error(&Error::Transient("x".into())), 3);
    }

    #[test]
    fn test_cli_parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "cadre",
            "run",
            "build an api",
            "--max-retries",
            "5",
            "--no-memory",
            "--non-interactive",
        ])
        .unwrap();
        match cli.command {
            Command::Run { description, args } => {
                assert_eq!(description, "build an api");
                assert_eq!(args.max_retries, Some(5));
                assert!(args.no_memory);
                assert!(args.non_interactive);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_options_overrides_apply() {
        let args = RunArgs {
            config: None,
            llm_cmd: "claude".into(),
            llm_arg: Vec::new(),
            persist_dir: Some(PathBuf::from("/tmp/cadre-test")),
            max_retries: Some(7),
            no_memory: true,
            coverage_threshold: Some(0.9),
            feedback_timeout: Some(10),
            non_interactive: true,
            no_metrics: true,
        };
        let options = build_options(&args).unwrap();
        assert_eq!(options.max_retries, 7);
        assert!(!options.memory_enabled);
        assert_eq!(options.coverage_threshold, 0.9);
        assert_eq!(options.feedback_timeout_secs, Some(10));
        assert_eq!(options.persist_dir, PathBuf::from("/tmp/cadre-test"));
    }

    #[test]
    fn test_invalid_threshold_is_config_error() {
        let args = RunArgs {
            config: None,
            llm_cmd: "claude".into(),
            llm_arg: Vec::new(),
            persist_dir: None,
            max_retries: None,
            no_memory: false,
            coverage_threshold: Some(2.0),
            feedback_timeout: None,
            non_interactive: false,
            no_metrics: true,
        };
        let err = build_options(&args).unwrap_err();
        assert_eq!(exit_code_for_error(&err), 5);
    }
}
