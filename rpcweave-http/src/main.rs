//! rpcweave-http - serves a demonstration method map over JSON-RPC/HTTP.
//!
//! Methods:
//! - `echo` - returns its first argument (or `value`)
//! - `sleep` - waits `ms` milliseconds; cancellable
//! - `log` - logs `line`; meant to be sent as a notification

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rpcweave_core::config::{Config, ConfigError, find_config_file, load_and_validate};
use rpcweave_core::dispatch::{DispatchOptions, DispatchPipeline};
use rpcweave_core::error::RpcError;
use rpcweave_core::error::jsonrpc::ResponseError;
use rpcweave_core::jsonrpc::Params;
use rpcweave_core::service::{HandlerContext, MethodMap};
use rpcweave_http::{HttpBinding, HttpBindingConfig, HttpError, serve};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Command line options.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: $RPCWEAVE_CONFIG, then ./rpcweave.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding http.listen
    #[arg(short, long, env = "RPCWEAVE_LISTEN")]
    listen: Option<String>,

    /// Emit responses in request order, overriding dispatch.ordered_output
    #[arg(long)]
    ordered: bool,
}

#[tokio::main]
async fn main() -> Result<(), HttpError> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load(&cli)?;
    if let Some(listen) = cli.listen {
        config.http.listen = listen;
    }
    if cli.ordered {
        config.dispatch.ordered_output = true;
    }

    info!(
        listen = %config.http.listen,
        path = %config.http.path,
        ordered_output = config.dispatch.ordered_output,
        allow_cancellation = config.dispatch.allow_cancellation,
        "rpcweave-http starting"
    );

    let pipeline = DispatchPipeline::new(demo_methods(), DispatchOptions::from(&config.dispatch));
    let binding = HttpBinding::new(pipeline, HttpBindingConfig::from(&config.http));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
        signal.cancel();
    });

    serve(&config.http.listen, binding, shutdown).await
}

/// Load the configuration file, falling back to defaults when none exists
/// and none was named explicitly.
fn load(cli: &Cli) -> Result<Config, ConfigError> {
    match find_config_file(cli.config.as_deref()) {
        Ok(path) => {
            info!(path = %path.display(), "loading configuration");
            load_and_validate(&path)
        }
        Err(ConfigError::ConfigFileNotFound { .. }) if cli.config.is_none() => {
            info!("no configuration file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e),
    }
}

fn invalid_params(details: impl Into<String>) -> ResponseError {
    RpcError::InvalidParams {
        details: details.into(),
    }
    .to_response_error()
}

fn demo_methods() -> MethodMap {
    MethodMap::new()
        .with_method("echo", |params: Option<Params>, _cx| async move {
            Ok(params
                .and_then(|p| p.get(0, "value").cloned())
                .unwrap_or(Value::Null))
        })
        .with_method("sleep", |params: Option<Params>, cx: HandlerContext| async move {
            let Some(ms) = params
                .as_ref()
                .and_then(|p| p.get(0, "ms"))
                .and_then(Value::as_u64)
            else {
                return Err(invalid_params("expected 'ms' as a non-negative integer"));
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!({ "slept_ms": ms })),
                _ = cx.cancel.cancelled() => Err(RpcError::RequestCancelled.to_response_error()),
            }
        })
        .with_method("log", |params: Option<Params>, cx: HandlerContext| async move {
            let Some(line) = params
                .as_ref()
                .and_then(|p| p.get(0, "line"))
                .and_then(Value::as_str)
            else {
                return Err(invalid_params("expected 'line' as a string"));
            };
            info!(
                correlation_id = %cx.invocation.correlation_id,
                line,
                "log notification"
            );
            Ok(Value::Null)
        })
}
