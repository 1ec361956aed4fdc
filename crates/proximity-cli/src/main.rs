use clap::{Parser, Subcommand};
use proximity_common::{AppId, BackupId};
use proximity_server::{create_router, AppState, ServerConfig};

#[derive(Parser)]
#[command(name = "proximity")]
#[command(about = "Operator CLI for a Proximity control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve,

    /// Catalog management
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },

    /// App lifecycle management
    Apps {
        #[command(subcommand)]
        command: AppCommands,
    },

    /// Backup management
    Backups {
        #[command(subcommand)]
        command: BackupCommands,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// List catalog apps
    List,
    /// Reload the catalog directory from disk
    Reload,
}

#[derive(Subcommand)]
enum AppCommands {
    /// List deployed apps
    List,
    /// Show a single app
    Show { id: AppId },
    /// Start/stop/restart an app
    Action { id: AppId, action: String },
    /// Clone an app under a new hostname
    Clone { id: AppId, new_hostname: String },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List backups for an app
    List { app_id: AppId },
    /// Create a backup for an app
    Create { app_id: AppId, storage: String },
    /// Restore a backup onto its app
    Restore { app_id: AppId, backup_id: BackupId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    let state = AppState::new(ServerConfig::default()).await?;

    match cli.command {
        Commands::Serve => {
            let config = ServerConfig::default();
            let bind_addr = format!("{}:{}", config.bind_address, config.port);
            let app = create_router(state);
            let addr: std::net::SocketAddr = bind_addr.parse()?;
            tracing::info!(%addr, "proximity server starting");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }

        Commands::Catalog { command } => match command {
            CatalogCommands::List => {
                for app in state.catalog.list().await {
                    println!("{:<20} {:<30} {}", app.id, app.name, app.version);
                }
            }
            CatalogCommands::Reload => {
                state.catalog.reload().await?;
                println!("catalog reloaded: {} apps", state.catalog.list().await.len());
            }
        },

        Commands::Apps { command } => match command {
            AppCommands::List => {
                for app in state.services.store.list_apps().await? {
                    println!("{:<36} {:<20} {:<16?} {}", app.id, app.hostname, app.status, app.ip.unwrap_or_default());
                }
            }
            AppCommands::Show { id } => {
                let app = state.services.store.get_app(id).await?;
                println!("{}", serde_json::to_string_pretty(&app)?);
            }
            AppCommands::Action { id, action } => {
                let action = match action.as_str() {
                    "start" => proximity_core::Action::Start,
                    "stop" => proximity_core::Action::Stop,
                    "restart" => proximity_core::Action::Restart,
                    other => anyhow::bail!("unknown action {other:?}"),
                };
                state.services.lifecycle.action(id, action).await?;
                println!("ok");
            }
            AppCommands::Clone { id, new_hostname } => {
                let placement = state.resolve_placement(None).await?;
                let new_id = state
                    .services
                    .lifecycle
                    .clone_app(id, new_hostname, placement.storage)
                    .await?;
                println!("cloned as {new_id}");
            }
        },

        Commands::Backups { command } => match command {
            BackupCommands::List { app_id } => {
                for backup in state.services.store.list_backups_for_app(app_id).await? {
                    println!("{:<36} {:<10?} {} bytes", backup.id, backup.status, backup.size_bytes);
                }
            }
            BackupCommands::Create { app_id, storage } => {
                let backup = state.services.lifecycle.backup(app_id, &storage).await?;
                println!("created backup {}", backup.id);
            }
            BackupCommands::Restore { app_id, backup_id } => {
                state.services.lifecycle.restore(app_id, backup_id).await?;
                println!("restored");
            }
        },
    }

    Ok(())
}
