//! `microbit-monitor` -- connects to the micro:bit bridge and logs
//! every device and connection event.
//!
//! Builds the single [`MicrobitService`] for the process, wires a
//! status listener plus a structured event log, and runs until SIGINT
//! or SIGTERM, then disconnects cleanly.
//!
//! # Environment variables
//!
//! | Variable                          | Required | Default                             | Description                     |
//! |-----------------------------------|----------|-------------------------------------|---------------------------------|
//! | `MICROBIT_WS_URL`                 | no       | `http://localhost:8080/ws/microbit` | Bridge endpoint                 |
//! | `MICROBIT_MAX_RECONNECT_ATTEMPTS` | no       | `5`                                 | Consecutive reconnect budget    |
//! | `MICROBIT_RECONNECT_INTERVAL_MS`  | no       | `3000`                              | Linear backoff unit             |
//! | `LOG_FORMAT`                      | no       | `text`                              | `json` for JSON log lines       |

use microbit_core::config::LinkConfig;
use microbit_events::{listener, EventKind, LinkEvent};
use microbit_link::MicrobitService;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = LinkConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        endpoint = %config.endpoint,
        max_reconnect_attempts = config.max_reconnect_attempts,
        reconnect_interval_ms = u64::try_from(config.reconnect_interval.as_millis()).unwrap_or(u64::MAX),
        "Starting microbit-monitor",
    );

    let service = MicrobitService::with_websocket(&config);

    service.on(
        EventKind::Connection,
        listener(|event| {
            if let LinkEvent::Connection(c) = event {
                if c.connected {
                    tracing::info!("Bridge link up");
                } else {
                    tracing::warn!(reason = c.reason.as_deref().unwrap_or(""), "Bridge link down");
                }
            }
        }),
    );

    let log_task = tokio::spawn(log_events(service.subscribe()));

    service.connect();
    shutdown_signal().await;

    service.disconnect();
    log_task.abort();
    tracing::info!("microbit-monitor stopped");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "microbit_link=info,microbit_monitor=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Log each event as one JSON document.
async fn log_events(mut rx: tokio::sync::broadcast::Receiver<LinkEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(event = %event.kind(), payload = %json, "micro:bit event"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Wait for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), disconnecting"),
        () = terminate => tracing::info!("Received SIGTERM, disconnecting"),
    }
}
