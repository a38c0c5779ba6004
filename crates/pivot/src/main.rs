//! Pivot CLI.
//!
//! Bootstraps an empty cluster into a self-hosting GitOps state and offers
//! helpers to read the generated password and reach the Git server.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::password::PasswordCommand;
use commands::proxy::ProxyCommand;
use commands::run::RunCommand;
use commands::version::VersionCommand;
use pivot::kubeconfig::KubeTarget;
use pivot::ui;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Pivot - from bootstrap to GitOps.
#[derive(Parser)]
#[command(
    name = "pivot",
    version,
    about = "Pivot a fresh cluster from bootstrap to GitOps",
    long_about = "Pivot a fresh cluster from bootstrap to GitOps.\n\n\
                  Builds a Git tree of operator manifests, installs the operators,\n\
                  stands up an in-cluster Git server, pushes the tree into it and\n\
                  hands control to Argo CD.\n\n\
                  Re-running is safe: existing objects and trees are reused."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Use an explicit Kubernetes context.
    #[arg(short, long, global = true, env = "PIVOT_CONTEXT")]
    context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the cluster.
    Run(RunCommand),

    /// Print the Git server password.
    Password(PasswordCommand),

    /// Forward a pod port to localhost.
    Proxy(ProxyCommand),

    /// Print version, commit and platform.
    Version(VersionCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info,pivot=debug")
        } else {
            EnvFilter::new("warn,pivot=info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.format {
        Format::Json => builder.json().init(),
        Format::Text => builder.init(),
    }

    let target = KubeTarget::with_context(cli.context.filter(|c| !c.is_empty()));
    let result = match cli.command {
        Commands::Run(cmd) => cmd.run(&target).await,
        Commands::Password(cmd) => cmd.run(&target).await,
        Commands::Proxy(cmd) => cmd.run(&target).await,
        Commands::Version(cmd) => cmd.run(),
    };

    if let Err(e) = result {
        ui::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
