//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pd", about = "Multi-agent deep research and pain-signal ingestion", version)]
pub struct Cli {
    /// Path to a config file (default: .prospectd.yml, then user config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run deep research for a query and print the report
    Research {
        /// The research query
        query: String,

        /// Enable deep read (page extraction + quote-grounded claims)
        #[arg(long)]
        deep: bool,

        /// Degrade gracefully instead of failing on planner/worker errors
        #[arg(long)]
        best_effort: bool,

        /// Use the draft-centric strategy instead of multi-round
        #[arg(long)]
        draft: bool,

        /// Persist plan/worker/report artifacts under the data directory
        #[arg(long)]
        save: bool,
    },

    /// Run the ingestion scheduler for a topic
    Ingest {
        /// The topic to mine for pain signals
        topic: Option<String>,

        /// Resume a paused session by id
        #[arg(long)]
        resume: Option<String>,

        /// Override the complexity-derived iteration cap
        #[arg(long)]
        max_iterations: Option<u64>,
    },

    /// List ingestion sessions
    Sessions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_research() {
        let cli = Cli::parse_from(["pd", "research", "how does QUIC work", "--deep", "--best-effort"]);
        match cli.command {
            Command::Research {
                query,
                deep,
                best_effort,
                draft,
                save,
            } => {
                assert_eq!(query, "how does QUIC work");
                assert!(deep);
                assert!(best_effort);
                assert!(!draft);
                assert!(!save);
            }
            _ => panic!("expected research command"),
        }
    }

    #[test]
    fn test_parse_ingest_resume() {
        let cli = Cli::parse_from(["pd", "ingest", "--resume", "abc123"]);
        match cli.command {
            Command::Ingest { topic, resume, .. } => {
                assert!(topic.is_none());
                assert_eq!(resume.as_deref(), Some("abc123"));
            }
            _ => panic!("expected ingest command"),
        }
    }
}
