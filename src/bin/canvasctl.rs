//! canvasctl: operator interface to the canvas workspace store.

use std::path::PathBuf;
use std::sync::Arc;

use canvas_runtime::config::Config;
use canvas_runtime::db::Db;
use canvas_runtime::model::{EntryId, WorkspaceId, WorkspaceSnapshot};
use canvas_runtime::runtime::RuntimeManager;
use canvas_runtime::snapshot;
use canvas_runtime::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "canvasctl", about = "Inspect and maintain canvas workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pending database migrations
    Migrate,
    /// Workspace catalog operations
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },
    /// Snapshot payload operations
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum WorkspaceAction {
    /// List the workspaces of an entry
    List {
        #[arg(long)]
        entry: EntryId,
    },
    /// Open an entry, creating its default workspace if needed
    Open {
        #[arg(long)]
        entry: EntryId,
    },
    /// Create a workspace
    Create {
        #[arg(long)]
        entry: EntryId,
        #[arg(long)]
        name: String,
    },
    /// Show a workspace record
    Show { id: WorkspaceId },
    /// Rename a workspace
    Rename { id: WorkspaceId, name: String },
    /// Delete a workspace (the default workspace cannot be deleted)
    Delete { id: WorkspaceId },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Print a workspace's persisted snapshot as JSON
    Export {
        id: WorkspaceId,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace a workspace's snapshot from a JSON file
    Import { id: WorkspaceId, file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "canvasctl".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    if let Command::Migrate = cli.command {
        db.migrate().await?;
        println!("Migrations applied.");
        return Ok(());
    }
    db.health_check().await?;

    let runtime = RuntimeManager::new(Arc::new(db), config.runtime()?);
    match cli.command {
        Command::Migrate => Ok(()),
        Command::Workspace { action } => cmd_workspace(&runtime, action).await,
        Command::Snapshot { action } => cmd_snapshot(&runtime, action).await,
    }
}

async fn cmd_workspace(runtime: &RuntimeManager, action: WorkspaceAction) -> anyhow::Result<()> {
    match action {
        WorkspaceAction::List { entry } => {
            let workspaces = runtime.list_workspaces(entry).await?;
            if workspaces.is_empty() {
                println!("No workspaces found.");
                return Ok(());
            }
            println!("{:<36}  {:<24}  {:<7}  UPDATED", "ID", "NAME", "DEFAULT");
            println!("{}", "-".repeat(90));
            for w in &workspaces {
                println!(
                    "{:<36}  {:<24}  {:<7}  {}",
                    w.id.0,
                    w.name,
                    if w.is_default { "yes" } else { "" },
                    w.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
            println!("\n{} workspace(s)", workspaces.len());
        }
        WorkspaceAction::Open { entry } => {
            let workspace = runtime.open_entry(entry).await?;
            println!("Default workspace: {} ({})", workspace.id.0, workspace.name);
        }
        WorkspaceAction::Create { entry, name } => {
            let workspace = runtime.create_workspace(entry, &name).await?;
            println!("Created: {} ({})", workspace.id.0, workspace.name);
        }
        WorkspaceAction::Show { id } => {
            let record = runtime.store().get(id).await?;
            let w = &record.workspace;
            println!("ID:         {}", w.id.0);
            println!("Entry:      {}", w.entry_id.0);
            println!("Name:       {}", w.name);
            println!("Default:    {}", w.is_default);
            println!("Version:    {}", record.version);
            match &record.payload {
                Some(payload) => {
                    println!("Schema:     v{}", payload.schema_version);
                    println!("Panels:     {}", payload.panels.len());
                    println!("Components: {}", payload.components.len());
                    println!(
                        "Camera:     ({}, {}) x{}",
                        payload.camera.translate_x, payload.camera.translate_y, payload.camera.zoom
                    );
                    println!("Captured:   {}", payload.captured_at);
                }
                None => println!("Payload:    (never saved)"),
            }
            println!("Created:    {}", w.created_at);
            println!("Updated:    {}", w.updated_at);
        }
        WorkspaceAction::Rename { id, name } => {
            let workspace = runtime.rename_workspace(id, &name).await?;
            println!("Renamed: {} -> {}", workspace.id.0, workspace.name);
        }
        WorkspaceAction::Delete { id } => {
            runtime.delete_workspace(id).await?;
            println!("Deleted: {}", id.0);
        }
    }
    Ok(())
}

async fn cmd_snapshot(runtime: &RuntimeManager, action: SnapshotAction) -> anyhow::Result<()> {
    let store = runtime.store();
    match action {
        SnapshotAction::Export { id, out } => {
            let record = store.get(id).await?;
            let payload = match record.payload {
                Some(payload) => snapshot::upgrade(payload)?,
                None => WorkspaceSnapshot::empty(),
            };
            let json = serde_json::to_string_pretty(&payload)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Exported {} at {} to {}", id.0, record.version, path.display());
                }
                None => println!("{json}"),
            }
        }
        SnapshotAction::Import { id, file } => {
            let raw = std::fs::read_to_string(&file)?;
            let payload: WorkspaceSnapshot = serde_json::from_str(&raw)?;
            let payload = snapshot::upgrade(payload)?;
            snapshot::validate(id, &payload)?;
            let record = store.get(id).await?;
            let version = store.put(id, &payload, record.version).await?;
            println!(
                "Imported {} entities into {} ({} -> {})",
                payload.entity_count(),
                id.0,
                record.version,
                version
            );
        }
    }
    Ok(())
}
