use std::env;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use proclubs_archiver::{
    app::{ComponentRegistry, build_router},
    config::Config,
    observability,
};

/// コンテナのhealthcheck用サブコマンド。ローカルのliveness probeを叩く。
fn run_healthcheck() -> Result<(), String> {
    let bind = env::var("ARCHIVER_HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
    let port = bind.rsplit(':').next().unwrap_or("8090");
    let url = format!("http://127.0.0.1:{port}/health/live");

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| format!("failed to create client: {e}"))?;

    let response = client.get(&url).send().map_err(|e| e.to_string())?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("status {}", response.status()))
    }
}

/// パニックを構造化ログに流す。ワーカータスク内のパニックはランタイムに
/// 吸われて見逃しやすいため、フックで必ず痕跡を残す。
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied())
            .unwrap_or("<non-string panic payload>");
        let location = info
            .location()
            .map_or_else(|| "<unknown>".to_string(), ToString::to_string);
        let current = std::thread::current();

        error!(
            panic.message = message,
            panic.location = %location,
            panic.thread = current.name().unwrap_or("unnamed"),
            "panic caught by hook"
        );
    }));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if matches!(env::args().nth(1).as_deref(), Some("healthcheck")) {
        match run_healthcheck() {
            Ok(()) => std::process::exit(0),
            Err(reason) => {
                eprintln!("healthcheck failed: {reason}");
                std::process::exit(1);
            }
        }
    }

    observability::init().context("failed to initialize tracing")?;
    install_panic_hook();

    let config = Config::from_env().context("configuration error")?;
    let bind_addr = config.http_bind();

    let registry = ComponentRegistry::build(config).context("failed to build component registry")?;
    registry.bootstrap().await.context("startup failed")?;

    let manager = registry.manager();
    let router = build_router(registry);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("cannot bind {bind_addr}"))?;

    info!(addr = %bind_addr, "control surface listening");

    if let Err(error) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        warn!(error = %error, "http server terminated abnormally");
    }

    // ワーカーの解体は猶予付き。実行中のティックはキャンセルを観測して止まる。
    manager.shutdown().await;

    Ok(())
}

/// SIGINT / SIGTERM のどちらかを待つ。どちらが来てもgraceful shutdownに入る。
async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, relying on Ctrl+C only");
            None
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match sigterm.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            warn!("Ctrl+C handler unavailable, waiting for SIGTERM only");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => info!("SIGINT received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}
