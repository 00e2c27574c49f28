//! codeact CLI
//!
//! Runs one task and prints each step as it finishes, then the answer.

use clap::Parser;
use codeact_core::{AgentEvent, ExecutionOutcome, RunOutcome, prompt::render_value};
use codeact_server::{Settings, bootstrap, config::split_list};
use tokio::sync::mpsc;

const DEFAULT_TASK: &str = "What was the hottest day in 2024 and how much was the Dow Jones on that day?";

#[derive(Parser, Debug)]
#[command(name = "codeact", version, about = "Solve a task with a code-writing agent")]
struct Cli {
    /// Task to solve; words are joined with spaces
    task: Vec<String>,

    /// Model id (`ollama/<name>` for Ollama)
    #[arg(long, env = "MODEL")]
    model: Option<String>,

    /// Step budget
    #[arg(long, env = "AGENT_MAX_STEPS")]
    max_steps: Option<usize>,

    /// Extra importable modules, comma separated
    #[arg(long, value_delimiter = ',')]
    allow_import: Vec<String>,

    /// Print the generated code of every step
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn task(&self) -> String {
        if self.task.is_empty() {
            DEFAULT_TASK.to_string()
        } else {
            self.task.join(" ")
        }
    }

    /// Environment settings with flags layered on top
    fn settings(&self) -> codeact_core::Result<Settings> {
        let model = self.model.clone();
        let mut settings = Settings::from_lookup(|key| match key {
            "MODEL" => model.clone().or_else(|| std::env::var(key).ok()),
            _ => std::env::var(key).ok(),
        })?;

        if let Some(max_steps) = self.max_steps {
            settings.max_steps = max_steps;
        }
        for module in split_list(&self.allow_import.join(",")) {
            if !settings.extra_imports.contains(&module) {
                settings.extra_imports.push(module);
            }
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    codeact_server::init_tracing("warn");

    let cli = Cli::parse();
    let settings = cli.settings()?;
    let agent = bootstrap::build_agent(&settings, None)?;
    let task = cli.task();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = async {
        while let Some(event) = rx.recv().await {
            print_event(&event, cli.verbose);
        }
    };
    let (report, ()) = tokio::join!(agent.run_with_events(&task, settings.max_steps, tx), printer);
    let report = report?;

    println!("{}", "-".repeat(20));
    match report.outcome {
        RunOutcome::FinalAnswer(value) => {
            println!("The final answer is:\n\n{}", render_value(&value));
        }
        RunOutcome::StepLimitExceeded { max_steps } => {
            println!("Could not solve task: Maximum number of steps exceeded ({max_steps}).");
        }
    }

    Ok(())
}

fn print_event(event: &AgentEvent, verbose: bool) {
    match event {
        AgentEvent::RunStarted { task, max_steps, .. } => {
            println!("Task: {task}  (up to {max_steps} steps)");
        }
        AgentEvent::StepRecorded { record } => {
            let summary = record.summary.as_deref().unwrap_or("(no summary)");
            println!("\nStep {}: {summary}", record.index + 1);

            if verbose {
                if let Some(code) = &record.code {
                    println!("```py\n{code}\n```");
                }
            }

            match &record.outcome {
                ExecutionOutcome::Success { output, .. } if !output.trim().is_empty() => {
                    println!("{}", output.trim_end());
                }
                ExecutionOutcome::Failure { message, .. } => println!("Error: {message}"),
                _ => {}
            }
        }
        AgentEvent::ProviderRetry {
            attempt,
            backoff_ms,
            error,
        } => {
            eprintln!("Provider call failed ({error}), retry {attempt} in {backoff_ms}ms");
        }
        AgentEvent::RunFailed { error, .. } => eprintln!("Run failed: {error}"),
        AgentEvent::StepStarted { .. } | AgentEvent::RunFinished { .. } => {}
    }
}
