use order_queue_cli::{run_cli, CliError};
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!("CLI error: {}", e);
        eprintln!("error: {}", e);

        // Exit with appropriate code based on error type
        let exit_code = match e {
            CliError::InvalidArgument { .. } => 1,
            CliError::Send(_) => 2,
            CliError::Configuration(_) => 3,
            CliError::Queue(_) => 4,
            CliError::Logging { .. } => 5,
            CliError::Output(_) => 6,
        };

        std::process::exit(exit_code);
    }
}
