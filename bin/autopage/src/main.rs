mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "autopage")]
#[command(about = "Declarative browser automation with a dual-backend runner", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file (default: ~/.autopage/config.json5)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script and print the typed command sequence
    Compile {
        /// Script file (.json for structured, anything else is textual)
        script: PathBuf,

        /// Print the wire-shaped JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Execute a script (or freeform instructions) and print the normalized result
    Run {
        /// Script file; omit to run freeform instructions only
        script: Option<PathBuf>,

        /// Freeform instructions for the remote backend
        #[arg(short, long)]
        instructions: Option<String>,

        /// Execution-mode override: simple or complex
        #[arg(long)]
        mode: Option<String>,

        /// Target URLs or entities (repeatable)
        #[arg(long)]
        target: Vec<String>,

        /// Workflow-budget override in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// User the execution runs as
        #[arg(long, default_value = "cli")]
        user: String,

        /// Task key for activity logging and procedural memory
        #[arg(long)]
        task_key: Option<String>,
    },

    /// Inspect procedural memory
    Procedures {
        #[command(subcommand)]
        command: ProceduresCommands,
    },
}

#[derive(Subcommand)]
enum ProceduresCommands {
    /// List stored procedures
    List,

    /// Show one procedure record as JSON
    Show {
        task_key: String,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Scope: user, project, or global
        #[arg(long, default_value = "user")]
        scope: String,
    },
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".autopage")
        .join("config.json5")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = autopage_core::Config::load_or_default(&config_path)?;

    match cli.command {
        Commands::Compile { script, json } => commands::compile(&script, json),
        Commands::Run {
            script,
            instructions,
            mode,
            target,
            timeout_ms,
            user,
            task_key,
        } => {
            commands::run(
                config,
                script.as_deref(),
                instructions,
                mode,
                target,
                timeout_ms,
                &user,
                task_key,
            )
            .await
        }
        Commands::Procedures { command } => match command {
            ProceduresCommands::List => commands::procedures_list(&config),
            ProceduresCommands::Show {
                task_key,
                user,
                scope,
            } => commands::procedures_show(&config, &task_key, &user, &scope),
        },
    }
}
