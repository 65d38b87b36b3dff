use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rekon_apply::{ApplyOptions, Callbacks, DeleteOptions, DocumentOperator, Operator, OwnedOperator};
use rekon_core::{Document, OwnerRef, Propagation, ResourceStore, DRY_RUN_ALL};
use rekon_kubehub::{gvk_key_of, KubeStore};
use rekon_store::MemStore;
use rekon_workspace::{build_function, build_triggers, Cfg, RuntimeTable, TRIGGER_API_VERSION, TRIGGER_KIND};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rekonctl", version, about = "Reconcile a function workspace against the cluster")]
struct Cli {
    /// Workspace directory holding config.yaml
    #[arg(short = 'd', long = "dir", global = true, default_value = ".")]
    dir: PathBuf,

    /// Kubernetes namespace (default: config.yaml, then current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PropagationArg { Background, Foreground, Orphan }

impl From<PropagationArg> for Propagation {
    fn from(p: PropagationArg) -> Self {
        match p {
            PropagationArg::Background => Propagation::Background,
            PropagationArg::Foreground => Propagation::Foreground,
            PropagationArg::Orphan => Propagation::Orphan,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the desired documents as YAML
    Render,
    /// Create or update the function and its triggers; remove triggers no longer configured
    Apply {
        /// Ask the server to validate without persisting
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
        /// Run against an in-memory store instead of the cluster
        #[arg(long = "offline", action = ArgAction::SetTrue)]
        offline: bool,
    },
    /// Delete the triggers, then the function
    Delete {
        #[arg(long = "propagation", value_enum, default_value_t = PropagationArg::Background)]
        propagation: PropagationArg,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
        #[arg(long = "offline", action = ArgAction::SetTrue)]
        offline: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("REKON_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REKON_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid REKON_METRICS_ADDR; expected host:port");
        }
    }
}

/// Desired documents for one workspace directory.
struct Workspace {
    function: Document,
    triggers: Vec<Document>,
    namespace: Option<String>,
}

fn load_workspace(dir: &Path, ns: Option<String>) -> Result<Workspace> {
    let cfg = Cfg::load(dir)?;
    let table = RuntimeTable::standard();
    let mut function = build_function(&cfg, &table, &[])?;
    let mut triggers = build_triggers(&cfg, function.name());
    let namespace = ns.or_else(|| cfg.namespace.clone());
    if let Some(ns) = &namespace {
        for doc in std::iter::once(&mut function).chain(triggers.iter_mut()) {
            doc.metadata.namespace = Some(ns.clone());
        }
    }
    info!(function = %function.name(), triggers = triggers.len(), ns = ?namespace, "workspace loaded");
    Ok(Workspace { function, triggers, namespace })
}

/// Function store and trigger store.
async fn stores(ws: &Workspace, offline: bool) -> Result<(Arc<dyn ResourceStore>, Arc<dyn ResourceStore>)> {
    if offline {
        info!("offline: using in-memory stores");
        let functions: Arc<dyn ResourceStore> = Arc::new(MemStore::new());
        let triggers: Arc<dyn ResourceStore> = Arc::new(MemStore::new());
        return Ok((functions, triggers));
    }
    let client = kube::Client::try_default().await.context("building kube client")?;
    let ns = ws.namespace.as_deref();
    let functions = KubeStore::connect(client.clone(), &gvk_key_of(&ws.function), ns).await?;
    let triggers = KubeStore::connect(client, &format!("{}/{}", TRIGGER_API_VERSION, TRIGGER_KIND), ns).await?;
    Ok((Arc::new(functions), Arc::new(triggers)))
}

fn dry_run_markers(dry_run: bool) -> Vec<String> {
    if dry_run { vec![DRY_RUN_ALL.to_string()] } else { Vec::new() }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            child.cancel();
        }
    });
    token
}

fn logging_callbacks() -> Callbacks {
    Callbacks::new().on_post(|ev, err| {
        if let Some(entry) = ev.status() {
            match err {
                Some(_) => warn!(status = %entry, "operation failed"),
                None => info!(status = %entry, "ok"),
            }
        }
        Ok(())
    })
}

async fn apply(ws: Workspace, dry_run: bool, offline: bool) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let markers = dry_run_markers(dry_run);
    let (function_store, trigger_store) = stores(&ws, offline).await?;

    // the trigger owner reference needs the function's server-assigned uid
    let applied: Arc<Mutex<Option<Document>>> = Arc::default();
    let capture = Arc::clone(&applied);
    let callbacks = logging_callbacks().on_post(move |ev, _| {
        if let Some(entry) = ev.status().filter(|e| !e.is_failed()) {
            *capture.lock().unwrap_or_else(|e| e.into_inner()) = Some(entry.document().clone());
        }
        Ok(())
    });
    let opts = ApplyOptions { callbacks, dry_run: markers.clone(), cancel: cancel.clone(), ..Default::default() };
    DocumentOperator::new(function_store, vec![ws.function.clone()])
        .apply(&opts)
        .await
        .with_context(|| format!("applying function {}", ws.function.name()))?;

    let function = applied
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
        .ok_or_else(|| anyhow!("no outcome reported for function {}", ws.function.name()))?;
    let owner = OwnerRef::to(&function);
    if owner.uid.is_empty() {
        return Err(anyhow!("function {} has no uid; cannot own triggers", function.name()));
    }

    let opts = ApplyOptions { owner_references: vec![owner], callbacks: logging_callbacks(), dry_run: markers, cancel };
    OwnedOperator::new(trigger_store, ws.triggers).apply(&opts).await.context("applying triggers")?;
    info!(function = %function.name(), dry_run, "apply complete");
    Ok(())
}

async fn delete(ws: Workspace, propagation: Propagation, dry_run: bool, offline: bool) -> Result<()> {
    let (function_store, trigger_store) = stores(&ws, offline).await?;
    let opts = DeleteOptions {
        propagation,
        callbacks: logging_callbacks(),
        dry_run: dry_run_markers(dry_run),
        cancel: cancel_on_ctrl_c(),
    };
    DocumentOperator::new(trigger_store, ws.triggers).delete(&opts).await.context("deleting triggers")?;
    let name = ws.function.name().to_string();
    DocumentOperator::new(function_store, vec![ws.function])
        .delete(&opts)
        .await
        .with_context(|| format!("deleting function {}", name))?;
    info!(function = %name, propagation = propagation.as_str(), "delete complete");
    Ok(())
}

fn render(ws: &Workspace) -> Result<()> {
    for doc in std::iter::once(&ws.function).chain(ws.triggers.iter()) {
        println!("---");
        print!("{}", serde_yaml::to_string(doc)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ws = load_workspace(&cli.dir, cli.namespace)?;

    match cli.command {
        Commands::Render => render(&ws),
        Commands::Apply { dry_run, offline } => apply(ws, dry_run, offline).await,
        Commands::Delete { propagation, dry_run, offline } => delete(ws, propagation.into(), dry_run, offline).await,
    }
}
