//! # Order Queue CLI
//!
//! Command-line front end for the order queue client.
//!
//! This module provides CLI commands for:
//! - Running the consumer worker loop
//! - Sending orders (or the canned test order) as a producer
//! - Reporting queue health as text or JSON

use clap::{Parser, Subcommand};
use order_queue::{
    OrderMessage, QueueClient, QueueClientFactory, QueueConfig, QueueError, QueueStatus,
    ReceiveMode, SendError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod processor;
pub mod worker;

pub use processor::{OrderProcessor, ProcessingError, SimulatedProcessor};
pub use worker::{StepOutcome, Worker, WorkerConfig, WorkerError, WorkerStats};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Default tracing filter when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "order_queue=info,order_queue_cli=info";

// ============================================================================
// CLI Structure
// ============================================================================

/// Order Queue CLI - producer, consumer and health check for order queues
#[derive(Parser)]
#[command(name = "order-queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send, consume and inspect order queues")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ORDER_QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Override the configured queue path
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Consume orders until interrupted
    Worker {
        /// Override the configured receive mode
        #[arg(short, long)]
        mode: Option<ReceiveModeArg>,
    },

    /// Send one order
    Send {
        /// Send the canned test order instead of building one
        #[arg(long, conflicts_with_all = ["customer", "product", "quantity", "amount", "id"])]
        test: bool,

        /// Customer name
        #[arg(long, required_unless_present = "test")]
        customer: Option<String>,

        /// Product name
        #[arg(long, required_unless_present = "test")]
        product: Option<String>,

        /// Quantity ordered
        #[arg(long, default_value = "1")]
        quantity: u32,

        /// Total amount, e.g. 19.99
        #[arg(long, required_unless_present = "test")]
        amount: Option<Decimal>,

        /// Order ID; generated when omitted
        #[arg(long)]
        id: Option<String>,
    },

    /// Show queue status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Receive strategies selectable on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ReceiveModeArg {
    /// One timed receive per request
    Polling,
    /// Background listener feeding a local buffer
    EventDriven,
}

impl From<ReceiveModeArg> for ReceiveMode {
    fn from(arg: ReceiveModeArg) -> Self {
        match arg {
            ReceiveModeArg::Polling => ReceiveMode::Polling,
            ReceiveModeArg::EventDriven => ReceiveMode::EventDriven,
        }
    }
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Settings read from configuration files and `OQ__` environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
}

/// Load configuration.
///
/// Sources, later ones overriding earlier ones:
///  1. `/etc/order-queue/config.{toml,yaml,json}`
///  2. `./config/order-queue.{toml,yaml,json}`
///  3. The explicit path, which must exist
///  4. Environment variables prefixed `OQ__`, e.g.
///     `OQ__QUEUE__RECEIVE_MODE=event_driven`
pub fn load_configuration(explicit_path: Option<&Path>) -> Result<CliConfig, CliError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("/etc/order-queue/config").required(false))
        .add_source(config::File::with_name("config/order-queue").required(false));

    if let Some(path) = explicit_path {
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix("OQ")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Apply command-line overrides on top of loaded configuration
fn apply_overrides(mut config: CliConfig, cli: &Cli) -> CliConfig {
    if let Some(queue) = &cli.queue {
        config.queue.queue_path = queue.clone();
    }
    if let Commands::Worker { mode: Some(mode) } = &cli.command {
        config.queue.receive_mode = (*mode).into();
    }
    config
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let config = load_configuration(cli.config.as_deref())?;
    let config = apply_overrides(config, &cli);
    config.queue.validate().map_err(QueueError::from)?;

    match cli.command {
        Commands::Worker { .. } => execute_worker_command(config).await,
        Commands::Send {
            test,
            customer,
            product,
            quantity,
            amount,
            id,
        } => {
            let order = build_order(test, customer, product, quantity, amount, id)?;
            execute_send_command(order, config).await
        }
        Commands::Status { format } => execute_status_command(format, config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
        let directives = match &cli.log_level {
            Some(level) => format!("order_queue={level},order_queue_cli={level}"),
            None => DEFAULT_LOG_FILTER.to_string(),
        };
        tracing_subscriber::EnvFilter::try_new(directives)
    });
    let filter = filter.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })?;

    // Logs go to stderr so command output on stdout stays machine readable.
    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Build the order described by the `send` arguments
pub fn build_order(
    test: bool,
    customer: Option<String>,
    product: Option<String>,
    quantity: u32,
    amount: Option<Decimal>,
    id: Option<String>,
) -> Result<OrderMessage, CliError> {
    if test {
        return Ok(OrderMessage::test_order());
    }

    let missing = |arg: &str| CliError::InvalidArgument {
        arg: arg.to_string(),
        message: "required unless --test is given".to_string(),
    };
    let customer = customer.ok_or_else(|| missing("customer"))?;
    let product = product.ok_or_else(|| missing("product"))?;
    let amount = amount.ok_or_else(|| missing("amount"))?;

    if amount.is_sign_negative() {
        return Err(CliError::InvalidArgument {
            arg: "amount".to_string(),
            message: "must not be negative".to_string(),
        });
    }

    let mut order = OrderMessage::new(customer, product, quantity, amount);
    if let Some(id) = id {
        order = order.with_order_id(id);
    }
    order.ensure_identity();
    Ok(order)
}

async fn execute_worker_command(config: CliConfig) -> Result<(), CliError> {
    let client: Arc<dyn QueueClient> =
        Arc::from(QueueClientFactory::create_client(config.queue).await?);
    client.start().await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let processor = Arc::new(SimulatedProcessor::new(config.worker.processing_delay()));
    let stats = Worker::new(Arc::clone(&client), processor, config.worker)
        .run(stop_rx)
        .await;
    signals.abort();

    client.shutdown().await;
    info!(
        processed = stats.processed,
        failed = stats.failed,
        idle_polls = stats.idle_polls,
        errors = stats.errors,
        "Worker finished"
    );
    Ok(())
}

async fn execute_send_command(order: OrderMessage, config: CliConfig) -> Result<(), CliError> {
    let client = QueueClientFactory::create_client(config.queue).await?;

    let result = client.send_message(order).await;
    client.shutdown().await;

    let order_id = result?;
    info!(order_id = %order_id, queue_path = %client.queue_path(), "Order sent");
    println!("{}", order_id);
    Ok(())
}

async fn execute_status_command(format: OutputFormat, config: CliConfig) -> Result<(), CliError> {
    let client = QueueClientFactory::create_client(config.queue).await?;
    let status = client.status().await;
    client.shutdown().await;

    println!("{}", render_status(&status, format)?);
    Ok(())
}

/// Render a status snapshot for the terminal
pub fn render_status(status: &QueueStatus, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(status)?),
        OutputFormat::Text => {
            let count = match status.message_count {
                -1 => "unknown".to_string(),
                n => n.to_string(),
            };
            Ok(format!(
                "Queue:            {}\n\
                 Transport:        {}\n\
                 Receive mode:     {}\n\
                 Available:        {}\n\
                 Messages:         {}\n\
                 Buffered:         {}\n\
                 Handle:           generation {}\n\
                 Dead-lettered:    {}\n\
                 Checked at:       {}",
                status.queue_path,
                status.transport,
                status.receive_mode,
                if status.queue_available { "yes" } else { "no" },
                count,
                status.buffered_messages,
                status.handle_generation,
                status.dead_lettered,
                status.timestamp,
            ))
        }
    }
}

/// Resolve when the process receives Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), stopping worker"),
        _ = terminate => info!("Received SIGTERM, stopping worker"),
    }
}
