// ABOUTME: murmur CLI entry point.
// ABOUTME: Provides serve, tools, and init subcommands.

use clap::{Parser, Subcommand};
use murmur_cli::{run_init, run_serve, run_tools, ServeOptions};
use std::path::PathBuf;

const SERVE_LOG: &str = "murmur-serve";

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Message bus for coordinating autonomous agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve bus tools as JSON-RPC over stdin/stdout
    Serve {
        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Log to ~/.config/murmur/murmur-serve.log instead of stderr
        #[arg(long)]
        log_file: bool,
    },
    /// Print tool definitions as JSON
    Tools,
    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config: config_path,
            log_file,
        } => {
            if log_file {
                murmur_log::init_file(SERVE_LOG);
                if let Some(path) = murmur_log::log_path(SERVE_LOG) {
                    eprintln!("Logging to {}", path.display());
                }
            } else {
                murmur_log::init();
            }
            run_serve(ServeOptions { config_path }).await
        }
        Commands::Tools => run_tools(),
        Commands::Init => {
            murmur_log::init();
            run_init()
        }
    }
}
