//! VitalWatch command-line entry point
//!
//! Exit codes:
//! - 0: Success
//! - 2: Readings were flagged and `--fail-on-alert` was given
//! - 3: Invalid input, configuration or arguments
//! - 4: File or source I/O error
//! - 10: Internal error

mod commands;
mod output;

use clap::Parser;
use commands::{Cli, ExitCode, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitalwatch_core::Error as CoreError;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

/// Map a failed command to its exit status
fn error_code(err: &anyhow::Error) -> ExitCode {
    if let Some(core) = err.downcast_ref::<CoreError>() {
        return match core {
            _ if core.is_user_error() => ExitCode::InvalidInput,
            CoreError::Source(_) | CoreError::Store(_) => ExitCode::FileError,
            _ => ExitCode::InternalError,
        };
    }
    if err.downcast_ref::<vitalwatch_core::ConfigError>().is_some()
        || err.downcast_ref::<vitalwatch_core::ValidationError>().is_some()
    {
        return ExitCode::InvalidInput;
    }
    if err.downcast_ref::<vitalwatch_core::SourceError>().is_some()
        || err.downcast_ref::<std::io::Error>().is_some()
    {
        return ExitCode::FileError;
    }
    ExitCode::InternalError
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let code = match commands::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Command failed");
            error_code(&e)
        }
    };
    std::process::exit(code.into());
}
