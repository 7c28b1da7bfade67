use clap::Parser;
use tracing_subscriber::EnvFilter;

mod analysis;
mod chat;
mod cli;
mod config;
mod daemon;
mod error;
mod llm;
mod notes;
mod rag;
mod storage;
mod transcript;

fn default_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => config::loader::load_config()
            .map(|c| c.daemon.log_level)
            .unwrap_or_else(|_| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(cli.verbose)),
        )
        .init();

    if let Err(e) = cli::handle_command(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
