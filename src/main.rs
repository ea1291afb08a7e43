//! Berth - named services, chains and data containers on Docker
//!
//! This is the main CLI entry point for Berth.

use berth::config::Settings;
use berth::container::SessionIo;
use berth::error::{BerthError, Result};
use berth::naming::ContainerKind;
use berth::orchestrator::{ExecOptions, KillOptions, NewChainOptions, Orchestrator, RunOptions};
use berth::prompt::{AutoConfirm, Confirm, TerminalConfirm};
use berth::runtime::{DockerRuntime, LogOptions};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Berth - named services, chains and data containers on Docker
#[derive(Parser)]
#[command(name = "berth")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Turns named service, chain and data definitions into managed Docker containers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage services
    #[command(alias = "srv")]
    Services {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Manage chains
    Chains {
        #[command(subcommand)]
        command: ChainCommands,
    },

    /// Manage data containers
    Data {
        #[command(subcommand)]
        command: DataCommands,
    },
}

#[derive(Args)]
struct Instance {
    /// Instance number, 0 for the highest existing one
    #[arg(long, default_value_t = 1)]
    number: u32,
}

#[derive(Args)]
struct RunArgs {
    /// Publish all exposed ports on random host ports
    #[arg(short = 'P', long)]
    publish: bool,
    /// Give the container extended privileges
    #[arg(long)]
    privileged: bool,
    /// Add a Linux capability
    #[arg(long)]
    cap_add: Vec<String>,
    /// Drop a Linux capability
    #[arg(long)]
    cap_drop: Vec<String>,
    /// Remove the container once it has started
    #[arg(long)]
    rm: bool,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        RunOptions {
            publish_all: args.publish,
            privileged: args.privileged,
            cap_add: args.cap_add,
            cap_drop: args.cap_drop,
            ephemeral: args.rm,
        }
    }
}

#[derive(Args)]
struct NewChainArgs {
    /// Chain option, key=value
    #[arg(short, long)]
    config: Vec<String>,
    /// Host directory to seed the chain's data container from
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Genesis file to install as genesis.json
    #[arg(long)]
    genesis: Option<PathBuf>,
    /// Configuration file to install as config.toml
    #[arg(long)]
    config_file: Option<PathBuf>,
    /// Validator key to install as priv_validator.json
    #[arg(long = "priv")]
    priv_validator: Option<PathBuf>,
    /// Validators CSV, optionally followed by an accounts CSV
    #[arg(long, value_delimiter = ',', num_args = 1..=2)]
    csv: Vec<PathBuf>,
    #[command(flatten)]
    run: RunArgs,
}

impl From<NewChainArgs> for NewChainOptions {
    fn from(args: NewChainArgs) -> Self {
        NewChainOptions {
            config_opts: args.config,
            dir: args.dir,
            genesis: args.genesis,
            config: args.config_file,
            priv_validator: args.priv_validator,
            csv: args.csv,
            run: args.run.into(),
        }
    }
}

#[derive(Args)]
struct KillArgs {
    /// Kill without waiting for a graceful stop
    #[arg(short, long)]
    force: bool,
    /// Remove the container after stopping it
    #[arg(long)]
    rm: bool,
    /// Also remove the data container
    #[arg(short = 'x', long)]
    data: bool,
    /// Also remove volumes
    #[arg(long)]
    volumes: bool,
    /// Seconds to wait for a graceful stop
    #[arg(short, long)]
    timeout: Option<u32>,
}

impl From<KillArgs> for KillOptions {
    fn from(args: KillArgs) -> Self {
        KillOptions {
            force: args.force,
            rm: args.rm,
            rm_data: args.data,
            volumes: args.volumes,
            timeout: args.timeout,
        }
    }
}

#[derive(Args)]
struct ExecArgs {
    /// Attach a terminal
    #[arg(short, long)]
    interactive: bool,
    /// Directory under the Berth root to bind into the container
    #[arg(long)]
    volume: Option<String>,
    /// Command to run
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

impl ExecArgs {
    fn split(self) -> (ExecOptions, SessionIo) {
        let io = if self.interactive {
            SessionIo::terminal()
        } else {
            SessionIo::detached()
        };
        let opts = ExecOptions {
            args: self.args,
            interactive: self.interactive,
            volume: self.volume,
        };
        (opts, io)
    }
}

#[derive(Args)]
struct UpdateArgs {
    /// Pull the image before recreating
    #[arg(short, long)]
    pull: bool,
    /// Seconds to wait for a graceful stop
    #[arg(short, long)]
    timeout: Option<u32>,
}

#[derive(Args)]
struct RmArgs {
    /// Also remove the data container
    #[arg(short = 'x', long)]
    data: bool,
    /// Also remove volumes
    #[arg(long)]
    volumes: bool,
    /// Also remove the definition file
    #[arg(long)]
    file: bool,
}

#[derive(Args)]
struct LogArgs {
    /// Follow log output
    #[arg(short, long)]
    follow: bool,
    /// Number of lines to show
    #[arg(short = 'n', long)]
    tail: Option<usize>,
}

impl From<LogArgs> for LogOptions {
    fn from(args: LogArgs) -> Self {
        LogOptions {
            follow: args.follow,
            tail: args.tail,
        }
    }
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Start a service and its dependencies
    Start {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Stop a service
    Stop {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        kill: KillArgs,
    },

    /// Run a command in a throwaway container built from a service
    Exec {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Recreate a service container
    Update {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        update: UpdateArgs,
    },

    /// Rename a service
    Rename {
        old: String,
        new: String,
        #[command(flatten)]
        instance: Instance,
    },

    /// Remove a service container
    Rm {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        rm: RmArgs,
    },

    /// Show service logs
    Logs {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        logs: LogArgs,
    },

    /// Show a service container's configuration
    Inspect {
        name: String,
        #[command(flatten)]
        instance: Instance,
    },

    /// List service definitions and containers
    Ls,
}

#[derive(Subcommand)]
enum ChainCommands {
    /// Set up and start a new chain
    New {
        name: String,
        #[command(flatten)]
        setup: NewChainArgs,
    },

    /// Set up a chain under a generated name
    Throwaway {
        /// Prefix of the generated name
        #[arg(default_value = "throwaway")]
        base: String,
        #[command(flatten)]
        setup: NewChainArgs,
    },

    /// Start a chain
    Start {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Stop a chain
    Stop {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        kill: KillArgs,
    },

    /// Run a command next to a chain, linked to it
    Exec {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Recreate a chain container
    Update {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        update: UpdateArgs,
    },

    /// Rename a chain
    Rename {
        old: String,
        new: String,
        #[command(flatten)]
        instance: Instance,
    },

    /// Remove a chain container
    Rm {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        rm: RmArgs,
    },

    /// Show chain logs
    Logs {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        logs: LogArgs,
    },

    /// Show a chain container's configuration
    Inspect {
        name: String,
        #[command(flatten)]
        instance: Instance,
    },

    /// List chain definitions and containers
    Ls,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Create a data container
    New {
        name: String,
        #[command(flatten)]
        instance: Instance,
    },

    /// Copy a host directory into a data container
    Import {
        name: String,
        /// Host directory
        src: PathBuf,
        /// Path inside the container, by default the container root
        dest: Option<String>,
        #[command(flatten)]
        instance: Instance,
    },

    /// Copy a directory out of a data container
    Export {
        name: String,
        /// Path inside the container, by default the container root
        #[arg(long)]
        src: Option<String>,
        /// Host directory, by default the data directory under the root
        dest: Option<PathBuf>,
        #[command(flatten)]
        instance: Instance,
    },

    /// Run a command with a data container's volumes
    Exec {
        name: String,
        #[command(flatten)]
        instance: Instance,
        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Rename a data container
    Rename {
        old: String,
        new: String,
        #[command(flatten)]
        instance: Instance,
    },

    /// Remove a data container
    Rm {
        name: String,
        #[command(flatten)]
        instance: Instance,
        /// Also remove volumes
        #[arg(long)]
        volumes: bool,
    },

    /// List data containers
    Ls,
}

impl Commands {
    /// Sessions handle interruption themselves, stopping their container.
    fn is_session(&self) -> bool {
        matches!(
            self,
            Commands::Services {
                command: ServiceCommands::Exec { .. }
            } | Commands::Chains {
                command: ChainCommands::Exec { .. }
            } | Commands::Data {
                command: DataCommands::Exec { .. }
            }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load()?;
    settings.ensure_dirs()?;

    let confirm: Arc<dyn Confirm> = if cli.yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(TerminalConfirm)
    };
    let runtime = Arc::new(DockerRuntime::connect()?);
    let orchestrator = Orchestrator::new(runtime, settings, confirm);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let interruptible = !cli.command.is_session();
    let result = tokio::select! {
        result = run(&orchestrator, cli.command, cancel.clone()) => result,
        _ = cancel.cancelled(), if interruptible => {
            Err(BerthError::Runtime("interrupted".to_string()))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    cancel.cancel();
}

async fn run(orchestrator: &Orchestrator, command: Commands, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Services { command } => run_service(orchestrator, command, cancel).await,
        Commands::Chains { command } => run_chain(orchestrator, command, cancel).await,
        Commands::Data { command } => run_data(orchestrator, command, cancel).await,
    }
}

async fn run_service(orchestrator: &Orchestrator, command: ServiceCommands, cancel: CancellationToken) -> Result<()> {
    match command {
        ServiceCommands::Start { name, instance, run } => {
            orchestrator
                .start_service(&name, instance.number, &run.into())
                .await?;
            println!("Service {} started", name);
        }
        ServiceCommands::Stop { name, instance, kill } => {
            orchestrator
                .kill_service(&name, instance.number, &kill.into())
                .await?;
            println!("Service {} stopped", name);
        }
        ServiceCommands::Exec { name, instance, exec } => {
            let (opts, io) = exec.split();
            orchestrator
                .exec_service(&name, instance.number, &opts, io, cancel)
                .await?;
        }
        ServiceCommands::Update { name, instance, update } => {
            orchestrator
                .update_service(&name, instance.number, update.pull, update.timeout)
                .await?;
            println!("Service {} updated", name);
        }
        ServiceCommands::Rename { old, new, instance } => {
            orchestrator
                .rename_service(&old, &new, instance.number)
                .await?;
            println!("Service {} renamed to {}", old, new);
        }
        ServiceCommands::Rm { name, instance, rm } => {
            orchestrator
                .rm_service(&name, instance.number, rm.data, rm.volumes, rm.file)
                .await?;
            println!("Service {} removed", name);
        }
        ServiceCommands::Logs { name, instance, logs } => {
            let mut stdout = tokio::io::stdout();
            orchestrator
                .service_logs(&name, instance.number, logs.into(), &mut stdout)
                .await?;
        }
        ServiceCommands::Inspect { name, instance } => {
            let details = orchestrator.inspect_service(&name, instance.number).await?;
            println!("{}", serde_json::to_string_pretty(&details.spec)?);
        }
        ServiceCommands::Ls => print_listing(orchestrator, ContainerKind::Service).await?,
    }
    Ok(())
}

async fn run_chain(orchestrator: &Orchestrator, command: ChainCommands, cancel: CancellationToken) -> Result<()> {
    match command {
        ChainCommands::New { name, setup } => {
            orchestrator.new_chain(&name, &setup.into()).await?;
            println!("Chain {} created", name);
        }
        ChainCommands::Throwaway { base, setup } => {
            let name = orchestrator.throwaway_chain(&base, &setup.into()).await?;
            println!("{}", name);
        }
        ChainCommands::Start { name, instance, run } => {
            orchestrator
                .start_chain(&name, instance.number, &run.into())
                .await?;
            println!("Chain {} started", name);
        }
        ChainCommands::Stop { name, instance, kill } => {
            orchestrator
                .kill_chain(&name, instance.number, &kill.into())
                .await?;
            println!("Chain {} stopped", name);
        }
        ChainCommands::Exec { name, instance, exec } => {
            let (opts, io) = exec.split();
            orchestrator
                .exec_chain(&name, instance.number, &opts, io, cancel)
                .await?;
        }
        ChainCommands::Update { name, instance, update } => {
            orchestrator
                .update_chain(&name, instance.number, update.pull, update.timeout)
                .await?;
            println!("Chain {} updated", name);
        }
        ChainCommands::Rename { old, new, instance } => {
            orchestrator
                .rename_chain(&old, &new, instance.number)
                .await?;
            println!("Chain {} renamed to {}", old, new);
        }
        ChainCommands::Rm { name, instance, rm } => {
            orchestrator
                .rm_chain(&name, instance.number, rm.data, rm.volumes, rm.file)
                .await?;
            println!("Chain {} removed", name);
        }
        ChainCommands::Logs { name, instance, logs } => {
            let mut stdout = tokio::io::stdout();
            orchestrator
                .chain_logs(&name, instance.number, logs.into(), &mut stdout)
                .await?;
        }
        ChainCommands::Inspect { name, instance } => {
            let details = orchestrator.inspect_chain(&name, instance.number).await?;
            println!("{}", serde_json::to_string_pretty(&details.spec)?);
        }
        ChainCommands::Ls => print_listing(orchestrator, ContainerKind::Chain).await?,
    }
    Ok(())
}

async fn run_data(orchestrator: &Orchestrator, command: DataCommands, cancel: CancellationToken) -> Result<()> {
    match command {
        DataCommands::New { name, instance } => {
            orchestrator.new_data(&name, instance.number).await?;
            println!("Data container {} created", name);
        }
        DataCommands::Import {
            name,
            src,
            dest,
            instance,
        } => {
            orchestrator
                .import_data(&name, instance.number, &src, dest.as_deref())
                .await?;
            println!("Imported {} into {}", src.display(), name);
        }
        DataCommands::Export {
            name,
            src,
            dest,
            instance,
        } => {
            orchestrator
                .export_data(&name, instance.number, src.as_deref(), dest.as_deref())
                .await?;
            println!("Exported {}", name);
        }
        DataCommands::Exec { name, instance, exec } => {
            let (opts, io) = exec.split();
            orchestrator
                .exec_data(&name, instance.number, &opts, io, cancel)
                .await?;
        }
        DataCommands::Rename { old, new, instance } => {
            orchestrator.rename_data(&old, &new, instance.number).await?;
            println!("Data container {} renamed to {}", old, new);
        }
        DataCommands::Rm {
            name,
            instance,
            volumes,
        } => {
            orchestrator.rm_data(&name, instance.number, volumes).await?;
            println!("Data container {} removed", name);
        }
        DataCommands::Ls => print_listing(orchestrator, ContainerKind::Data).await?,
    }
    Ok(())
}

async fn print_listing(orchestrator: &Orchestrator, kind: ContainerKind) -> Result<()> {
    let containers = orchestrator.list(kind).await?;

    println!("{:<24} {:<8} {:<10} CONTAINER", "NAME", "NUMBER", "STATE");
    for (identity, summary) in &containers {
        let state = if summary.running { "running" } else { "stopped" };
        println!(
            "{:<24} {:<8} {:<10} {}",
            identity.name, identity.number, state, summary.name
        );
    }

    if kind == ContainerKind::Data {
        return Ok(());
    }
    let idle: Vec<String> = orchestrator
        .list_definitions(kind)?
        .into_iter()
        .filter(|name| !containers.iter().any(|(id, _)| &id.name == name))
        .collect();
    for name in idle {
        println!("{:<24} {:<8} {:<10} -", name, "-", "defined");
    }
    Ok(())
}
