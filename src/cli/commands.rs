use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dealscope")]
#[command(author, version, about = "Sales-call analysis with retrieval-grounded LLM reports")]
#[command(
    long_about = "Index sales-call transcripts, score script adherence, ICP fit and objection handling, and chat about each meeting"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a transcript file as a new meeting
    Ingest {
        /// Transcript text file ("HH:MM:SS - Speaker: text" lines)
        file: PathBuf,
        /// Meeting title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,
        /// Replace the transcript of an existing meeting instead
        #[arg(long)]
        meeting_id: Option<String>,
    },

    /// Run the analysis pipeline for a meeting
    Analyze {
        /// Meeting ID
        id: String,
        /// Index and summarise only
        #[arg(long)]
        quick: bool,
        /// Comma-separated analysis types: script, icp, objections
        #[arg(long)]
        types: Option<String>,
    },

    /// Ask a question about a meeting
    Ask {
        /// Meeting ID
        id: String,
        /// The question
        question: String,
    },

    /// Show the stored report for a meeting
    Report {
        /// Meeting ID (interactive selection if omitted)
        id: Option<String>,
        /// Print raw JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// List meetings
    List {
        /// Maximum number of meetings to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Analyze transcripts that have not been processed yet
    ProcessPending {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Build or rebuild the retrieval index for a meeting
    Index {
        /// Meeting ID
        id: String,
    },

    /// Semantic search over a meeting's transcript
    Search {
        /// Meeting ID
        id: String,
        /// Search query
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Restrict to chunks with this speaker
        #[arg(long)]
        speaker: Option<String>,
    },

    /// Vector store statistics
    Stats {
        /// Restrict to one meeting
        id: Option<String>,
    },

    /// LLM model management
    Models {
        #[command(subcommand)]
        action: ModelCommands,
    },

    /// Run the background analysis daemon
    Daemon,

    /// Queue a meeting on the running daemon
    Submit {
        /// Meeting ID
        id: String,
        /// Comma-separated analysis types: script, icp, objections
        #[arg(long)]
        types: Option<String>,
    },

    /// Show daemon status, or one job when an ID is given
    Status {
        /// Job ID
        job: Option<String>,
    },

    /// Cancel a queued or running daemon job
    Cancel {
        /// Job ID
        job: String,
    },

    /// Stop the daemon
    Shutdown,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print config file path
    Path,
    /// Initialize default configuration
    Init,
}

#[derive(Subcommand)]
pub enum ModelCommands {
    /// Check that the configured models respond
    Test,
}
