use std::path::PathBuf;

use clap::{Parser, Subcommand};

use rig::{cli, exit_codes, logging};

#[derive(Parser)]
#[command(name = "rig", about = "Playbook-driven test orchestration", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a playbook
    Run {
        /// Playbook name (file stem under playbooks/)
        playbook: String,
        /// Definition root directory
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Engine config file (defaults to <root>/rig.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override a module's environment binding (MODULE=ENVID)
        #[arg(long = "env", value_name = "MODULE=ENVID")]
        env_overrides: Vec<String>,
    },
    /// Check every definition under the root
    Validate {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// List available definitions
    List {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Summarize an existing run directory
    Report {
        run_dir: PathBuf,
    },
}

fn main() {
    logging::init();
    let args = Cli::parse();

    let outcome = match args.command {
        Command::Run {
            playbook,
            root,
            config,
            env_overrides,
        } => parse_overrides(&env_overrides).and_then(|env_overrides| {
            cli::run(&cli::RunArgs {
                root,
                playbook,
                config,
                env_overrides,
            })
        }),
        Command::Validate { root } => cli::validate(&root),
        Command::List { root } => cli::list(&root).map(|()| exit_codes::OK),
        Command::Report { run_dir } => cli::report(&run_dir),
    };

    let code = outcome.unwrap_or_else(|e| {
        eprintln!("error: {e:#}");
        exit_codes::INVALID
    });
    std::process::exit(code);
}

fn parse_overrides(
    raw: &[String],
) -> anyhow::Result<std::collections::BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| cli::parse_env_override(pair))
        .collect()
}
