use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reportflow::cli::commands::generate::GenerateOptions;
use reportflow::config::ProviderKind;
use reportflow::format::OutputFormat;
use reportflow::workflow::ReportKind;

#[derive(Parser)]
#[command(name = "reportflow")]
#[command(version, about = "Multi-agent report generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a report for a topic
    Generate {
        #[arg(long, short, help = "Report topic")]
        topic: String,
        #[arg(long, short, help = "Report kind: research, business, technical, academic")]
        kind: Option<ReportKind>,
        #[arg(long, short, help = "Target characters per section")]
        length: Option<usize>,
        #[arg(long = "no-polish", help = "Skip the polish stage")]
        no_polish: bool,
        #[arg(long = "no-charts", help = "Skip the chart stage")]
        no_charts: bool,
        #[arg(long, help = "Fail the run if polishing fails")]
        require_polish: bool,
        #[arg(long, help = "Fail the run if chart planning fails")]
        require_charts: bool,
        #[arg(
            long,
            short,
            value_delimiter = ',',
            help = "Output formats: markdown, json"
        )]
        format: Vec<OutputFormat>,
        #[arg(long, short, help = "Output directory")]
        output: Option<PathBuf>,
        #[arg(long, help = "LLM provider (openai, vllm, demo)")]
        provider: Option<ProviderKind>,
        #[arg(long, help = "Model to use")]
        model: Option<String>,
        #[arg(long, help = "Per-attempt timeout in seconds")]
        timeout: Option<u64>,
        #[arg(long = "no-store", help = "Do not record the run")]
        no_store: bool,
    },

    /// Inspect recorded runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recent runs
    List {
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Show one run's stages, failure and warnings
    Show {
        id: String,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Delete a finished run record
    Purge { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mReportFlow encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Generate {
            topic,
            kind,
            length,
            no_polish,
            no_charts,
            require_polish,
            require_charts,
            format,
            output,
            provider,
            model,
            timeout,
            no_store,
        } => {
            reportflow::cli::commands::generate::run(GenerateOptions {
                topic,
                kind,
                length,
                no_polish,
                no_charts,
                require_polish,
                require_charts,
                formats: format,
                output,
                provider,
                model,
                timeout,
                no_store,
            })?;
        }
        Commands::Runs { action } => match action {
            RunsAction::List { limit, format } => {
                reportflow::cli::commands::runs::list(limit, &format)?;
            }
            RunsAction::Show { id, format } => {
                reportflow::cli::commands::runs::show(&id, &format)?;
            }
            RunsAction::Purge { id } => {
                reportflow::cli::commands::runs::purge(&id)?;
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                reportflow::cli::commands::config::show(global, &format)?;
            }
            ConfigAction::Path => {
                reportflow::cli::commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                reportflow::cli::commands::config::init(global, force)?;
            }
        },
    }

    Ok(())
}
