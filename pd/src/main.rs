//! pd - prospectd command-line entry point

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing_subscriber::EnvFilter;

use prospectd::agent::{ParallelWorkerRunner, SubagentRunner};
use prospectd::cli::{Cli, Command};
use prospectd::config::Config;
use prospectd::events::{AgentEvent, EventEmitter};
use prospectd::ingest::IngestionScheduler;
use prospectd::research::{DeepResearch, ResearchStrategy, persist_outcome};
use prospectd::tools::ToolRegistry;
use signalstore::{SessionManager, load_or_create_session};

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("prospectd=debug,signalstore=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prospectd=info,signalstore=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Emitter that prints progress and worker completions to stderr
fn console_emitter() -> EventEmitter {
    EventEmitter::new(|event| match &event {
        AgentEvent::Progress { stage, message, .. } => eprintln!("[{stage}] {message}"),
        AgentEvent::WorkerCompleted {
            task_id,
            success,
            citations,
            evidence,
            error,
            ..
        } => {
            if *success {
                eprintln!("[worker] {task_id}: ok ({citations} citations, {evidence} evidence)");
            } else {
                eprintln!("[worker] {task_id}: FAILED ({error})");
            }
        }
        AgentEvent::Document { doc_id, title, source } => {
            eprintln!("[doc] {source}/{doc_id}: {title}");
        }
        AgentEvent::Error { message, .. } => eprintln!("[error] {message}"),
        _ => {}
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Invalid configuration")?;

    match cli.command {
        Command::Research {
            query,
            deep,
            best_effort,
            draft,
            save,
        } => {
            let mut research_config = config.research.clone();
            if deep {
                research_config.enable_deep_read = true;
                research_config.require_quote_per_claim = true;
            }
            if best_effort {
                research_config.best_effort = true;
            }
            if draft {
                research_config.strategy = ResearchStrategy::DraftCentric;
            }

            let llm = config.llm.create_client()?;
            let registry = Arc::new(ToolRegistry::with_research_tools(std::env::current_dir()?));
            let runner = Arc::new(SubagentRunner::new(llm.clone(), registry));
            let pool = Arc::new(ParallelWorkerRunner::new(runner));

            let research = DeepResearch::new(llm, pool, research_config, console_emitter());
            match research.run(&query).await {
                Ok(outcome) => {
                    println!("{}", outcome.report_markdown);
                    if save {
                        let session_id = persist_outcome(&outcome, &config.ingest.data_dir)?;
                        eprintln!("[saved] session {session_id}");
                    }
                    Ok(())
                }
                Err(prospectd::research::ResearchError::Run(run_err)) => {
                    // Persist diagnostics for the partial outcome before failing
                    if save {
                        if let Ok(session_id) = persist_outcome(&run_err.outcome, &config.ingest.data_dir) {
                            eprintln!("[saved] partial outcome as session {session_id}");
                        }
                    }
                    Err(eyre::eyre!("Research failed: {}", run_err.message))
                }
                Err(e) => Err(eyre::eyre!("Research failed: {e}")),
            }
        }

        Command::Ingest {
            topic,
            resume,
            max_iterations,
        } => {
            let session = load_or_create_session(
                resume.as_deref(),
                topic.as_deref(),
                max_iterations.unwrap_or(60),
                &config.ingest.data_dir,
            )
            .map_err(|e| eyre::eyre!("{e}"))?;

            let mut session = session;
            if let Some(cap) = max_iterations {
                session.max_iterations = cap;
            }

            let llm = config.llm.create_client()?;
            // Source connectors register here; none ship by default.
            let sources = Vec::new();
            let mut scheduler =
                IngestionScheduler::new(session, sources, config.ingest.clone(), llm, console_emitter())?;
            scheduler.run().await
        }

        Command::Sessions => {
            let manager = SessionManager::new(&config.ingest.data_dir).map_err(|e| eyre::eyre!("{e}"))?;
            let sessions = manager.list_sessions();
            if sessions.is_empty() {
                println!("No sessions found under {}", config.ingest.data_dir.display());
                return Ok(());
            }
            for s in sessions {
                println!(
                    "{}  {:<9}  docs={:<4} snippets={:<4} iters={:<3}  {}",
                    s.session_id,
                    s.status.to_string(),
                    s.stats.docs_collected,
                    s.stats.snippets_extracted,
                    s.stats.iterations,
                    s.topic,
                );
            }
            Ok(())
        }
    }
}
