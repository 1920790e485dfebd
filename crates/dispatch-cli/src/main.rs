use clap::{Parser, Subcommand};
use dispatch_core::config::{ProcessConfig, SchedulerConfigUpdate};
use dispatch_core::repository::{ConfigRepositoryTrait, SqliteRepository, WorkerRepositoryTrait};
use dispatch_core::Result;
use std::path::PathBuf;
use tracing::info;

/// Security checks for CLI operations.
mod security {
    use std::path::Path;

    pub fn check_not_root() -> std::result::Result<(), String> {
        #[cfg(unix)]
        {
            let uid = unsafe { libc::getuid() };
            if uid == 0 {
                return Err(
                    "refusing to run as root; run dispatch as a non-privileged user".to_string(),
                );
            }
        }
        Ok(())
    }

    /// Warn (and reject world-writable) on overly permissive config files.
    pub fn check_config_permissions(path: &Path) -> std::result::Result<(), String> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = std::fs::metadata(path).map_err(|e| format!("cannot read config file: {e}"))?;
            let mode = metadata.permissions().mode();
            if mode & 0o002 != 0 {
                return Err(format!(
                    "config file {} is world-writable; run: chmod 600 {}",
                    path.display(),
                    path.display()
                ));
            }
            if mode & 0o004 != 0 {
                eprintln!(
                    "warning: config file {} is world-readable, consider chmod 600",
                    path.display()
                );
            }
        }
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "dispatch")]
#[command(about = "Document-parsing job dispatcher")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dispatch server
    Serve {
        #[arg(short = 'H', long, help = "Bind address")]
        host: Option<String>,

        #[arg(short = 'P', long, help = "Port number")]
        port: Option<u16>,

        #[arg(long, help = "SQLite database URL", default_value = "sqlite://dispatch.db")]
        database_url: String,
    },

    /// Worker registry management
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Scheduler configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// List registered workers
    List,

    /// Register a new worker
    Add {
        #[arg(help = "Worker name")]
        name: String,

        #[arg(help = "Worker base URL")]
        url: String,

        #[arg(long, help = "Backend identifier reported to the worker")]
        backend: Option<String>,
    },

    /// Enable a disabled worker
    Enable {
        #[arg(help = "Worker id")]
        id: uuid::Uuid,
    },

    /// Disable a worker, excluding it from dispatch
    Disable {
        #[arg(help = "Worker id")]
        id: uuid::Uuid,
    },

    /// Deregister a worker
    Remove {
        #[arg(help = "Worker id")]
        id: uuid::Uuid,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the persisted scheduler configuration
    Show {
        #[arg(long, help = "SQLite database URL", default_value = "sqlite://dispatch.db")]
        database_url: String,
    },

    /// Patch one or more scheduler tunables
    Set {
        #[arg(long, help = "SQLite database URL", default_value = "sqlite://dispatch.db")]
        database_url: String,

        #[arg(long)]
        task_timeout: Option<u64>,
        #[arg(long)]
        queue_timeout: Option<u64>,
        #[arg(long)]
        max_queue_size: Option<usize>,
        #[arg(long)]
        enable_priority: Option<bool>,
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long)]
        retry_delay: Option<u64>,
        #[arg(long)]
        health_check_interval: Option<u64>,
        #[arg(long)]
        instance_timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let mut process_config = if let Some(ref config_path) = cli.config {
        if let Err(e) = security::check_config_permissions(config_path) {
            eprintln!("{e}");
            std::process::exit(1);
        }
        let path = config_path
            .to_str()
            .ok_or_else(|| dispatch_core::Error::Other("config path is not valid UTF-8".to_string()))?;
        ProcessConfig::load(path)?
    } else {
        ProcessConfig::from_env()?
    };

    match cli.command {
        Commands::Serve { host, port, database_url } => {
            if let Err(e) = security::check_not_root() {
                eprintln!("{e}");
                std::process::exit(1);
            }

            if let Some(host) = host {
                process_config.host = host;
            }
            if let Some(port) = port {
                process_config.port = port;
            }
            process_config.database_url.get_or_insert(database_url);

            info!("starting dispatch on {}:{}", process_config.host, process_config.port);
            dispatch_api::run(process_config).await?;
        }

        Commands::Worker { command } => {
            handle_worker_command(command).await?;
        }

        Commands::Config { command } => {
            handle_config_command(command).await?;
        }
    }

    Ok(())
}

async fn handle_worker_command(command: WorkerCommands) -> Result<()> {
    match command {
        WorkerCommands::List => {
            let repo = SqliteRepository::connect("sqlite://dispatch.db").await?;
            let workers = repo.list().await?;
            if workers.is_empty() {
                println!("no workers registered");
                return Ok(());
            }
            println!("{:<36} {:<20} {:<30} {:<8} {:<10} {:<6}", "ID", "NAME", "URL", "ENABLED", "TOTAL", "FAILED");
            for w in workers {
                println!(
                    "{:<36} {:<20} {:<30} {:<8} {:<10} {:<6}",
                    w.id, w.name, w.url, w.enabled, w.total_jobs, w.failed_jobs
                );
            }
        }

        WorkerCommands::Add { name, url, backend } => {
            let repo = SqliteRepository::connect("sqlite://dispatch.db").await?;
            let worker = dispatch_core::worker::Worker::new(name, url, backend);
            repo.upsert(&worker).await?;
            println!("registered worker {} ({})", worker.id, worker.name);
        }

        WorkerCommands::Enable { id } => {
            let repo = SqliteRepository::connect("sqlite://dispatch.db").await?;
            repo.update_enabled(id, true).await?;
            println!("worker {id} enabled");
        }

        WorkerCommands::Disable { id } => {
            let repo = SqliteRepository::connect("sqlite://dispatch.db").await?;
            repo.update_enabled(id, false).await?;
            println!("worker {id} disabled");
        }

        WorkerCommands::Remove { id } => {
            let repo = SqliteRepository::connect("sqlite://dispatch.db").await?;
            repo.delete(id).await?;
            println!("worker {id} removed");
        }
    }
    Ok(())
}

async fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show { database_url } => {
            let repo = SqliteRepository::connect(&database_url).await?;
            let config = repo.load().await?;
            println!("{config:#?}");
        }

        ConfigCommands::Set {
            database_url,
            task_timeout,
            queue_timeout,
            max_queue_size,
            enable_priority,
            max_retries,
            retry_delay,
            health_check_interval,
            instance_timeout,
        } => {
            let repo = SqliteRepository::connect(&database_url).await?;
            let current = repo.load().await?;
            let update = SchedulerConfigUpdate {
                task_timeout,
                queue_timeout,
                max_queue_size,
                enable_priority,
                max_retries,
                retry_delay,
                health_check_interval,
                instance_timeout,
            };
            let next = current.merge(&update)?;
            repo.save(&next).await?;
            println!("{next:#?}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::parse_from(["dispatch", "serve"]);
        assert!(matches!(cli.command, Commands::Serve { .. }));
    }

    #[test]
    fn parses_worker_add_subcommand() {
        let cli = Cli::parse_from(["dispatch", "worker", "add", "w1", "http://localhost:9000"]);
        match cli.command {
            Commands::Worker { command: WorkerCommands::Add { name, url, backend } } => {
                assert_eq!(name, "w1");
                assert_eq!(url, "http://localhost:9000");
                assert!(backend.is_none());
            }
            _ => panic!("expected worker add"),
        }
    }
}
