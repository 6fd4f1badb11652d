//! webhook-mirror binary.
//!
//! Runs as a Lambda custom runtime, a standalone webhook receiver, or a
//! one-shot invocation on an event file.

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webhook_mirror::runtime::{ErrorReport, LambdaRuntime};
use webhook_mirror::server::{self, AppState};
use webhook_mirror::{build_handler, Config, WebhookEvent};

#[derive(Parser)]
#[command(name = "webhook-mirror")]
#[command(about = "Mirror GitHub repositories into CodeCommit on push webhooks")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve invocations from the AWS Lambda Runtime API
    ///
    /// git runs with HOME=$GIT_HOME_DIR, or $LAMBDA_TASK_ROOT when unset, so the
    /// bundled .gitconfig with the CodeCommit credential helper is found.
    Lambda,

    /// Receive GitHub webhooks over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT", default_value_t = 8080)]
        port: u16,

        /// Webhook signing secret configured on GitHub
        #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,
    },

    /// Handle a single gateway event read from a file (`-` for stdin)
    Invoke {
        /// Path to the event JSON document
        #[arg(short, long)]
        event: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("webhook_mirror=info,tower_http=info"));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().flatten_event(true))
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Lambda => run_lambda().await,
        Commands::Serve { port, secret } => run_server(port, &secret).await,
        Commands::Invoke { event } => run_invoke(&event).await,
    }
}

async fn run_lambda() -> Result<()> {
    let runtime = LambdaRuntime::from_env()?;

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            runtime
                .report_init_error(&ErrorReport::new("ConfigError", &e))
                .await?;
            return Err(e.into());
        }
    };

    let handler = match build_handler(&config) {
        Ok(handler) => handler,
        Err(e) => {
            error!(error = %e, "Failed to create AWS clients");
            runtime
                .report_init_error(&ErrorReport::new("InitError", &e))
                .await?;
            return Err(e.into());
        }
    };

    info!(branch = %config.branch, owner = %config.source_owner, "Mirror handler ready");
    runtime.run(&handler).await.context("Lambda runtime failed")
}

async fn run_server(port: u16, secret: &str) -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    let handler = build_handler(&config).context("Failed to create AWS clients")?;

    let app = server::build_router(AppState::new(handler, secret));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port, branch = %config.branch, "Webhook receiver listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

async fn run_invoke(path: &Path) -> Result<()> {
    let raw = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read event from stdin")?;
        buffer
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read event file {}", path.display()))?
    };
    let event: WebhookEvent = serde_json::from_str(&raw).context("Failed to parse event")?;

    let config = Config::from_env().context("Invalid configuration")?;
    let handler = build_handler(&config).context("Failed to create AWS clients")?;

    let outcome = handler.handle(event).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
