use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use xlrun_config::Config;
use xlrun_job_queue::QueueSettings;

/// Queue timings from the runner section.
pub fn queue_settings_from_config(cfg: &Config) -> QueueSettings {
    QueueSettings::default()
        .with_ttl(Duration::from_secs(cfg.runner.job_ttl_minutes.saturating_mul(60)))
        .with_reap_interval(Duration::from_secs(cfg.runner.reap_interval_secs))
        .with_poll_interval(Duration::from_millis(cfg.runner.poll_interval_ms))
}

/// Parse host:port into a SocketAddr, with fallback to 0.0.0.0.
pub fn parse_bind_address(host: &str, port: u16) -> SocketAddr {
    host.trim_matches(|c| c == '[' || c == ']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .or_else(|_| host.parse::<SocketAddr>())
        .unwrap_or_else(|_| {
            if host != "localhost" {
                tracing::warn!(%host, "host is not an IP address, binding all interfaces");
                return SocketAddr::from(([0, 0, 0, 0], port));
            }
            SocketAddr::from(([127, 0, 0, 1], port))
        })
}

/// Resolves on Ctrl-C (and SIGTERM on unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(%e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(%e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
