use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use netsentry::config::AppConfig;
use netsentry::runtime::Runtime;
use tracing::{error, info};

/// netsentry — flow-telemetry DDoS detection daemon.
#[derive(Parser, Debug)]
#[command(name = "netsentryd", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the operator API listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override the sFlow intake bind address.
    #[arg(long)]
    sflow_bind: Option<String>,

    /// Override the NetFlow/IPFIX intake bind address.
    #[arg(long)]
    netflow_bind: Option<String>,

    /// Override the mirrored-traffic intake bind address.
    #[arg(long)]
    mirror_bind: Option<String>,
}

const BANNER: &str = r#"
  _   _      _    ____             _
 | \ | | ___| |_ / ___|  ___ _ __ | |_ _ __ _   _
 |  \| |/ _ \ __|\___ \ / _ \ '_ \| __| '__| | | |
 | |\  |  __/ |_  ___) |  __/ | | | |_| |  | |_| |
 |_| \_|\___|\__||____/ \___|_| |_|\__|_|   \__, |
                                             |___/
"#;

const EXIT_CONFIG_ERROR: u8 = 64;
const EXIT_BIND_FAILURE: u8 = 69;
const EXIT_FATAL: u8 = 70;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "netsentry=info".into()),
        )
        .init();

    let cli = Cli::parse();
    println!("{BANNER}");
    info!(version = env!("CARGO_PKG_VERSION"), "starting netsentry");

    let mut config = match &cli.config {
        Some(path) => match AppConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "configuration error");
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        },
        None => AppConfig::default(),
    };
    let config_path = cli.config.clone();
    if let Some(listen) = cli.listen {
        config.operator_api.listen = listen;
    }
    if let Some(bind) = cli.sflow_bind {
        config.sflow.bind = bind;
        config.sflow.enabled = true;
    }
    if let Some(bind) = cli.netflow_bind {
        config.netflow.bind = bind;
        config.netflow.enabled = true;
    }
    if let Some(bind) = cli.mirror_bind {
        config.mirror.bind = bind;
        config.mirror.enabled = true;
    }

    let runtime = match Runtime::new(config.clone()) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let intake_handles = match runtime.spawn_intake().await {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "failed to bind telemetry intake socket");
            return ExitCode::from(EXIT_BIND_FAILURE);
        }
    };
    runtime.spawn_tick_driver();
    spawn_reload_on_sighup(Arc::clone(&runtime), config_path);

    let listener = match tokio::net::TcpListener::bind(&config.operator_api.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = %config.operator_api.listen, "failed to bind operator API");
            return ExitCode::from(EXIT_BIND_FAILURE);
        }
    };
    info!(addr = %config.operator_api.listen, "operator API listening");
    let app = netsentry::api::router(Arc::clone(&runtime));

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!(error = %e, "operator API server failed");
                return ExitCode::from(EXIT_FATAL);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining final tick");
            runtime.tick();
        }
    }

    for handle in intake_handles {
        handle.abort();
    }

    ExitCode::SUCCESS
}

/// `SIGHUP` re-reads the config file and atomically swaps the host-group
/// forest; a parse or CIDR-overlap error keeps the previous generation
/// serving (§7 "Configuration error at reload").
fn spawn_reload_on_sighup(runtime: Arc<Runtime>, config_path: Option<String>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGHUP handler");
                return;
            }
        };
        loop {
            sighup.recv().await;
            let Some(path) = &config_path else {
                info!("SIGHUP received but no --config was given, nothing to reload");
                continue;
            };
            match AppConfig::from_file(path) {
                Ok(new_config) => match runtime.reload_hostgroups(&new_config) {
                    Ok(()) => info!("configuration reloaded on SIGHUP"),
                    Err(e) => error!(error = %e, "SIGHUP reload rejected, keeping previous configuration"),
                },
                Err(e) => error!(error = %e, "SIGHUP reload: failed to read config file"),
            }
        }
    });
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
