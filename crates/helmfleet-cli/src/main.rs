//! helmfleet CLI - parameterized multi-replica helm releases

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;

use commands::install::InstallArgs;
use commands::render::OutputFormat;
use commands::teardown::TeardownArgs;

#[derive(Parser)]
#[command(name = "helmfleet")]
#[command(version)]
#[command(
    about = "Render, install, and tear down parameterized multi-replica helm releases",
    long_about = None
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ~/.config/helmfleet/config.yaml)
    #[arg(long, global = true, env = "HELMFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the values of one replica without touching a cluster
    Render {
        /// Template name
        template: String,

        /// Replica index
        #[arg(short, long, default_value_t = 0)]
        index: usize,

        /// Override an overridable parameter (key=value)
        #[arg(long = "set")]
        set: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
        output: OutputFormat,

        /// Template directory
        #[arg(long)]
        templates: Option<PathBuf>,
    },

    /// Install replicas of a template into an environment
    Install(InstallArgs),

    /// Uninstall replicas and delete their namespaces
    Teardown(TeardownArgs),
}

fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> error::Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            template,
            index,
            set,
            output,
            templates,
        } => commands::render::run(
            &config,
            templates.as_deref(),
            &template,
            index,
            &set,
            output,
            cli.debug,
        ),
        Commands::Install(args) => commands::install::run(&config, args).await,
        Commands::Teardown(args) => commands::teardown::run(&config, args).await,
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let code = match run(cli).await {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            let code = e.exit_code();
            eprintln!("{:?}", miette::Report::new(e));
            code
        }
    };
    std::process::exit(code);
}
