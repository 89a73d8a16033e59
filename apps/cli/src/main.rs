//! mediafetch CLI - downloads every video linked from a page
//!
//! Interrupted transfers are resumed where the server allows it, and the
//! tool waits out network outages instead of failing.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// mediafetch - resilient media downloader
#[derive(Parser)]
#[command(name = "mediafetch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true, env = "MEDIAFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory downloaded files are placed in
    #[arg(long, global = true, env = "MEDIAFETCH_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// File extension to look for (repeatable)
    #[arg(long = "ext", global = true)]
    extensions: Vec<String>,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    output: OutputFormat,

    /// Plain single-line progress instead of a progress bar
    #[arg(long, global = true)]
    plain: bool,

    /// Give up on a file after this many attempts (default: never)
    #[arg(long, global = true, env = "MEDIAFETCH_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a page and download every linked file (default)
    Run {
        /// Page to scan for media links
        page_url: Option<String>,
    },

    /// Download the given URLs
    Get {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Show the files a page links to, without downloading
    List {
        /// Page to scan for media links
        page_url: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "mediafetch", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .map(|d| d.join("mediafetch").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("mediafetch.json"))
    });
    let mut settings = mediafetch_core::config::load_settings(&config_path).await?;

    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }
    if !cli.extensions.is_empty() {
        settings.extensions = cli.extensions;
    }
    if cli.max_attempts.is_some() {
        settings.max_attempts = cli.max_attempts;
    }

    match cli.command.unwrap_or(Commands::Run { page_url: None }) {
        Commands::Run { page_url } => {
            if let Some(url) = page_url {
                settings.page_url = url;
            }
            commands::run_page(&settings, cli.output, cli.plain).await?
        }

        Commands::Get { urls } => commands::get_urls(&settings, urls, cli.output, cli.plain).await?,

        Commands::List { page_url } => {
            if let Some(url) = page_url {
                settings.page_url = url;
            }
            commands::list_page(&settings, cli.output).await?
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}
