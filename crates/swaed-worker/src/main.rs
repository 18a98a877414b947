//! swaed-worker - run the SwaedUAE offline worker from the command line.
//!
//! Each invocation delivers one event to the worker against a real origin,
//! with cache buckets and the pending-action store kept on disk between
//! runs. Useful for exercising install/activate, inspecting what a page
//! would be served offline, and replaying queued actions by hand.

mod report;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use swaed_worker_core::config::DEFAULT_PERIODIC_TAG;
use swaed_worker_core::{
    ActionKind, Destination, FileCacheStorage, FileStore, HttpNetwork, Method, NotificationData,
    Request, RequestMode, ServiceWorker, WorkerConfig, WorkerEvent, WorkerMessage,
};

type Worker = ServiceWorker<HttpNetwork, FileCacheStorage, FileStore>;

#[derive(Parser)]
#[command(name = "swaed-worker", version, about = "SwaedUAE offline worker host")]
struct Cli {
    /// Origin relative URLs are resolved against (overrides SWAED_ORIGIN)
    #[arg(long)]
    origin: Option<String>,

    /// Config file (defaults to ~/.config/swaed-worker/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for cache buckets and pending actions (overrides SWAED_CACHE_DIR)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Cache the static manifest into the current bucket
    Install,
    /// Delete every bucket except the current one
    Activate,
    /// Intercept a request and print what the page would receive
    Fetch {
        url: String,
        /// Treat the request as a top-level navigation
        #[arg(long)]
        navigate: bool,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Request destination: document, script, style, image, font, manifest, empty
        #[arg(long, default_value = "empty")]
        destination: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Queue an action as a page would while offline
    Enqueue {
        /// check-in, check-out or event-registration
        kind: String,
        /// JSON payload
        payload: String,
    },
    /// Deliver a background-sync event
    Sync { tag: String },
    /// Deliver a periodic-sync event
    PeriodicSync {
        #[arg(default_value = DEFAULT_PERIODIC_TAG)]
        tag: String,
    },
    /// Deliver a push message and print the notification it produces
    Push { payload: Option<String> },
    /// Click a notification action
    Click {
        /// view or dismiss; omit for a body click
        action: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Post a message to the worker (e.g. SKIP_WAITING, GET_VERSION)
    Message { kind: String },
    /// List queued actions per kind
    Pending,
    /// Show lifecycle state, buckets and queue sizes
    Status,
    /// Write the effective configuration to the config file
    InitConfig,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn load_config(cli: &Cli) -> Result<WorkerConfig> {
    let mut config = match cli.config {
        Some(ref path) => WorkerConfig::load_from(path)?,
        None => WorkerConfig::load()?,
    };

    if let Some(ref origin) = cli.origin {
        config.origin = Some(origin.clone());
    } else if let Ok(origin) = std::env::var("SWAED_ORIGIN") {
        config.origin = Some(origin);
    }
    Ok(config)
}

fn state_dir(cli: &Cli, config: &WorkerConfig) -> Result<PathBuf> {
    if let Some(ref dir) = cli.state_dir {
        return Ok(dir.clone());
    }
    if let Ok(dir) = std::env::var("SWAED_CACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    config.state_dir()
}

async fn build_worker(config: WorkerConfig, state_dir: &Path) -> Result<Worker> {
    let network = HttpNetwork::new(&config).context("Failed to create HTTP client")?;
    let buckets = FileCacheStorage::new(state_dir.join("buckets"))
        .context("Failed to open cache bucket storage")?;
    let store = FileStore::new(state_dir.join("pending")).context("Failed to open pending store")?;

    let worker = ServiceWorker::new(config, network, buckets, store)?;
    let state = worker.restore().await?;
    debug!(state = ?state, dir = %state_dir.display(), "Worker ready");
    Ok(worker)
}

fn build_request(
    url: String,
    navigate: bool,
    method: &str,
    destination: &str,
    body: Option<String>,
) -> Result<Request> {
    let method =
        Method::parse(method).ok_or_else(|| anyhow::anyhow!("Unknown HTTP method: {}", method))?;
    let destination = Destination::parse(destination)
        .ok_or_else(|| anyhow::anyhow!("Unknown destination: {}", destination))?;

    let mut request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
            .with_mode(RequestMode::Cors)
            .with_destination(destination)
    }
    .with_method(method);

    if let Some(body) = body {
        let value: serde_json::Value =
            serde_json::from_str(&body).context("Request body is not valid JSON")?;
        request = request.with_header("content-type", "application/json");
        request.body = Some(serde_json::to_vec(&value)?);
    }
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;

    let config = load_config(&cli)?;
    let dir = state_dir(&cli, &config)?;
    let worker = build_worker(config, &dir).await?;

    let event = match cli.command {
        Command::Install => WorkerEvent::Install,
        Command::Activate => WorkerEvent::Activate,
        Command::Fetch {
            url,
            navigate,
            method,
            destination,
            body,
        } => WorkerEvent::Fetch(build_request(url, navigate, &method, &destination, body)?),
        Command::Sync { tag } => WorkerEvent::Sync { tag },
        Command::PeriodicSync { tag } => WorkerEvent::PeriodicSync { tag },
        Command::Push { payload } => WorkerEvent::Push {
            payload: payload.map(String::into_bytes),
        },
        Command::Click { action, url } => WorkerEvent::NotificationClick {
            action,
            data: url.map(|url| NotificationData {
                url,
                date_of_arrival: chrono::Utc::now(),
            }),
        },
        Command::Message { kind } => {
            WorkerEvent::Message(WorkerMessage::from_value(&serde_json::Value::String(kind)))
        }
        Command::Enqueue { kind, payload } => {
            let kind = ActionKind::parse(&kind)
                .ok_or_else(|| anyhow::anyhow!("Unknown action kind: {}", kind))?;
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let action = worker.queue().enqueue(kind, payload).await?;
            report::print_json(&report::pending_action(&action))?;
            return Ok(());
        }
        Command::Pending => {
            report::print_json(&report::pending(&worker).await?)?;
            return Ok(());
        }
        Command::Status => {
            report::print_json(&report::status(&worker).await?)?;
            return Ok(());
        }
        Command::InitConfig => {
            let path = match cli.config {
                Some(path) => path,
                None => WorkerConfig::config_path()?,
            };
            worker.config().save_to(&path)?;
            println!("{}", path.display());
            return Ok(());
        }
    };

    debug!(event = ?event, "Dispatching event");
    let outcome = worker.handle(event).await?;
    report::print_json(&report::outcome(outcome))?;
    Ok(())
}
