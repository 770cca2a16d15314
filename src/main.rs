use std::path::PathBuf;
use std::sync::Once;

use clap::{Parser, Subcommand, ValueEnum};
use oxitask::{
    Engine, EngineConfig, EntityKind, EntitySchema, FieldValue, FsStore, Record, SyncEvent,
    SyncService, Vault, VaultPath,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Task,
    Project,
    Area,
}

impl From<KindArg> for EntityKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Task => EntityKind::Task,
            KindArg::Project => EntityKind::Project,
            KindArg::Area => EntityKind::Area,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "oxitask",
    version,
    about = "Task/Project/Area record maintenance for Obsidian vaults"
)]
struct Cli {
    /// Path to the Obsidian vault.
    #[arg(long, env = "OBSIDIAN_VAULT", global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate every entity header to the current schema.
    Reconcile,
    /// Create a new entity document.
    Create {
        kind: KindArg,
        name: String,
        /// Written into the body in place of `{{description}}`.
        #[arg(long)]
        description: Option<String>,
        /// Project the entity belongs to (tasks and areas).
        #[arg(long)]
        project: Option<String>,
        /// Areas the entity belongs to (tasks and projects; repeatable).
        #[arg(long = "area")]
        areas: Vec<String>,
    },
    /// Print an entity as JSON.
    Show {
        /// Vault-relative path of the document.
        path: String,
    },
    /// Watch the vault and keep Status/Done in sync.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let engine = open_engine(cli.vault)?;

    match cli.command {
        Command::Reconcile => handle_reconcile(&engine).await?,
        Command::Create {
            kind,
            name,
            description,
            project,
            areas,
        } => handle_create(&engine, kind.into(), name, description, project, areas).await?,
        Command::Show { path } => handle_show(&engine, &path).await?,
        Command::Watch => handle_watch(engine).await?,
    }

    Ok(())
}

fn open_engine(vault: Option<PathBuf>) -> anyhow::Result<Engine<FsStore>> {
    let vault = Vault::open(require_vault(vault)?)?;
    let config = EngineConfig::load(&vault)?;
    Ok(Engine::new(FsStore::new(vault), config)?)
}

async fn handle_reconcile(engine: &Engine<FsStore>) -> anyhow::Result<()> {
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let report = engine.reconcile_all(Some(cancel_rx)).await?;
    println!("reconcile");
    println!("  scanned: {}", report.files_scanned);
    println!("  files updated: {}", report.files_updated);
    println!("  properties updated: {}", report.properties_updated);
    println!("  skipped: {}", report.skipped);
    if report.cancelled {
        println!("  cancelled before completion");
    }
    if !report.errors.is_empty() {
        println!("\nerrors:");
        for err in &report.errors {
            let path = err
                .path
                .as_ref()
                .map(VaultPath::as_str_lossy)
                .unwrap_or_else(|| "-".to_string());
            println!("- {path}\t{}", err.message);
        }
    }
    Ok(())
}

async fn handle_create(
    engine: &Engine<FsStore>,
    kind: EntityKind,
    name: String,
    description: Option<String>,
    project: Option<String>,
    areas: Vec<String>,
) -> anyhow::Result<()> {
    let name_field = match kind {
        EntityKind::Task => "Title",
        EntityKind::Project | EntityKind::Area => "Name",
    };
    let schema = EntitySchema::for_kind(kind);
    let kind_name = kind.as_str().to_lowercase();
    if project.is_some() && schema.get("Project").is_none() {
        anyhow::bail!("--project does not apply to {kind_name} documents");
    }
    if !areas.is_empty() && schema.get("Areas").is_none() {
        anyhow::bail!("--area does not apply to {kind_name} documents");
    }

    let mut data = Record::new();
    data.insert(name_field, FieldValue::text(name));
    if let Some(description) = description {
        data.insert("Description", FieldValue::text(description));
    }
    if let Some(project) = project {
        data.insert("Project", FieldValue::text(project));
    }
    if !areas.is_empty() {
        data.insert("Areas", FieldValue::strings(areas));
    }

    let path = engine.create_entity(kind, data).await?;
    println!("{}", path.as_str_lossy());
    Ok(())
}

async fn handle_show(engine: &Engine<FsStore>, path: &str) -> anyhow::Result<()> {
    let path = VaultPath::try_from(path)?;
    match engine.load(&path).await? {
        Some(entity) => println!("{}", serde_json::to_string_pretty(&entity)?),
        None => anyhow::bail!("{} is not a task, project or area", path.as_str_lossy()),
    }
    Ok(())
}

async fn handle_watch(engine: Engine<FsStore>) -> anyhow::Result<()> {
    let mut service = SyncService::new(engine);
    let mut rx = service.subscribe();
    service.start_watching().await?;
    println!("watching... (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            ev = rx.recv() => {
                match ev {
                    Ok(ev) => print_event(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        eprintln!("(lagged {n} events)");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

fn print_event(ev: &SyncEvent) {
    match ev {
        SyncEvent::Corrected {
            path,
            field,
            value,
            revision,
        } => println!(
            "corrected\t{}\t{field}={}\trev={revision}",
            path.as_str_lossy(),
            serde_json::to_string(value).unwrap_or_default()
        ),
        SyncEvent::Settled { path } => println!("settled\t{}", path.as_str_lossy()),
        SyncEvent::Removed { path } => println!("removed\t{}", path.as_str_lossy()),
        SyncEvent::Error { path, error } => eprintln!(
            "error\t{}\t{error}",
            path.as_ref().map(VaultPath::as_str_lossy).unwrap_or_default()
        ),
    }
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    });
}

fn require_vault(vault: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    vault.ok_or_else(|| anyhow::anyhow!("--vault is required (or set OBSIDIAN_VAULT)"))
}
