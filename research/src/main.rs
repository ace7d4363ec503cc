//! Citation-verified research report pipeline CLI.
//!
//! Maps pipeline outcomes onto the stable exit codes in
//! [`research::exit_codes`]; the acquisition backend is the deterministic
//! in-tree stub.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use research::core::types::Depth;
use research::exit_codes;
use research::io::acquire::{StubSearchProvider, StubSourceFetcher};
use research::io::answers::{AnswerSource, StdinAnswerSource};
use research::io::config::load_config;
use research::machine::{RunOptions, RunOutcome, RunReport, StateMachine, verify_run};

#[derive(Parser)]
#[command(
    name = "research",
    version,
    about = "Citation-verified research report pipeline"
)]
struct Cli {
    /// Path to the engine configuration file.
    #[arg(long, default_value = "research.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the research pipeline for a topic.
    Run {
        /// Research topic.
        topic: String,
        /// Existing run id to resume.
        #[arg(long)]
        run_id: Option<String>,
        /// Override the configured worker bound.
        #[arg(long)]
        workers: Option<usize>,
        /// Override the configured depth (brief, medium, deep).
        #[arg(long)]
        depth: Option<Depth>,
        /// Override the configured source budget.
        #[arg(long)]
        budget: Option<usize>,
        /// Override the configured language tag.
        #[arg(long)]
        lang: Option<String>,
        /// Report clarification questions instead of prompting on stdin.
        #[arg(long)]
        non_interactive: bool,
    },
    /// Resume an existing run from its last completed stage.
    Resume {
        /// Run id of the run to resume.
        run_id: String,
    },
    /// Re-run structural verification for an existing run.
    Verify {
        /// Run id of the run to verify.
        run_id: String,
    },
}

fn main() {
    research::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let search = StubSearchProvider;
    let fetcher = StubSourceFetcher;

    match cli.command {
        Command::Run {
            topic,
            run_id,
            workers,
            depth,
            budget,
            lang,
            non_interactive,
        } => {
            let machine = StateMachine::new(config, &search, &fetcher);
            let stdin_answers = StdinAnswerSource;
            let opts = RunOptions {
                run_id,
                workers,
                depth,
                budget,
                lang,
                answers: if non_interactive {
                    None
                } else {
                    Some(&stdin_answers as &dyn AnswerSource)
                },
            };
            let report = machine.run(&topic, &opts)?;
            print_report(&report);
            Ok(code_for(&report.outcome))
        }
        Command::Resume { run_id } => {
            let run_state = config.runs_dir.join(&run_id).join("run_state.json");
            if !run_state.exists() {
                anyhow::bail!("unknown run id {run_id}");
            }
            let machine = StateMachine::new(config, &search, &fetcher);
            let opts = RunOptions {
                run_id: Some(run_id),
                ..RunOptions::default()
            };
            let report = machine.run("", &opts)?;
            print_report(&report);
            Ok(code_for(&report.outcome))
        }
        Command::Verify { run_id } => {
            let report = verify_run(&config, &run_id)?;
            print_report(&report);
            Ok(code_for(&report.outcome))
        }
    }
}

fn print_report(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Completed => {
            println!("run {} completed", report.run_id);
            if let Some(result) = &report.state.verification {
                println!(
                    "verification passed: {} paragraphs, {} citations",
                    result.total_paragraphs, result.citations_found
                );
            }
        }
        RunOutcome::ClarificationRequired { questions } => {
            println!("run {} needs clarification:", report.run_id);
            for question in questions {
                println!("- {question}");
            }
        }
        RunOutcome::VerificationFailed => {
            println!("run {} failed verification", report.run_id);
            if let Some(result) = &report.state.verification {
                println!(
                    "paragraphs without citation: {}; see evidence/verify.json",
                    result.paragraph_without_citation_count
                );
            }
        }
    }
}

fn code_for(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed => exit_codes::OK,
        RunOutcome::ClarificationRequired { .. } => exit_codes::CLARIFICATION_REQUIRED,
        RunOutcome::VerificationFailed => exit_codes::VERIFICATION_FAILED,
    }
}
