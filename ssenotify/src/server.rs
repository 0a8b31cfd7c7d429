//! Server lifecycle management
//!
//! Binds the HTTP listener, runs the idle session sweeper and drives
//! graceful shutdown: stop accepting, end every open stream, then wait a
//! bounded time for connections to drain.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ssenotify_api::{create_router, AppState, DefaultPayloadSource};
use ssenotify_core::Config;
use ssenotify_hub::SessionHub;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// SSE Notify server
pub struct NotifyServer {
    config: Config,
    hub: SessionHub,
    listener: TcpListener,
}

impl NotifyServer {
    /// Bind the configured HTTP address
    pub async fn bind(config: Config) -> anyhow::Result<Self> {
        let http_address = config.http_address();
        let http_addr: SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        Ok(Self {
            config,
            hub: SessionHub::new(),
            listener,
        })
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    /// Serve until SIGINT/SIGTERM
    pub async fn start(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then shut down gracefully
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        info!("Starting SSE Notify server...");

        let Self {
            config,
            hub,
            listener,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let background = CancellationToken::new();

        let sweeper = config.notifications.idle_session_ttl().map(|ttl| {
            info!(
                ttl_secs = ttl.as_secs(),
                interval_secs = config.notifications.sweep_interval_seconds,
                "Idle session sweeper enabled"
            );
            hub.spawn_idle_sweeper(
                ttl,
                config.notifications.sweep_interval(),
                background.child_token(),
            )
        });

        let state = AppState::new(hub.clone(), DefaultPayloadSource)
            .with_keep_alive(config.notifications.keep_alive());
        let router = create_router(state, &config.cors);

        let mut http_handle = spawn_http_server(listener, router, shutdown_rx)?;

        tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Stop accepting, then end open streams so in-flight connections can finish
        let _ = shutdown_tx.send(true);
        background.cancel();

        let closed = hub.close_all();
        info!(closed = closed, "Closed open notification streams");

        let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
        drain(&hub, grace).await;

        if !http_handle.is_finished()
            && tokio::time::timeout(grace, &mut http_handle).await.is_err()
        {
            warn!("HTTP server did not stop within {}s, aborting", grace.as_secs());
            http_handle.abort();
        }

        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        info!("SSE Notify server stopped");
        Ok(())
    }
}

fn spawn_http_server(
    listener: TcpListener,
    router: axum::Router,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<()>> {
    let http_addr = listener.local_addr()?;

    Ok(tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);

        let mut rx = shutdown_rx;
        let graceful = async move {
            let _ = rx.changed().await;
        };

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
        {
            error!("HTTP server error: {}", e);
        }

        info!("HTTP server shut down gracefully");
    }))
}

/// Wait until every stream released its channel, or `grace` elapsed
async fn drain(hub: &SessionHub, grace: Duration) {
    let active = hub.active_channel_count();
    if active == 0 {
        return;
    }

    info!(
        "Waiting up to {}s for {} stream(s) to drain...",
        grace.as_secs(),
        active
    );
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let remaining = hub.active_channel_count();
        if remaining == 0 {
            info!("All streams drained");
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "Drain timeout reached with {} stream(s) still active, proceeding with shutdown",
                remaining
            );
            break;
        }
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use ssenotify_core::SessionId;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.http_port = 0;
        config.server.shutdown_grace_seconds = 2;
        config
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_host() {
        let mut config = test_config();
        config.server.host = "not a host".to_string();
        assert!(NotifyServer::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_streams() {
        let server = NotifyServer::bind(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let hub = server.hub().clone();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let response = reqwest::get(format!("http://{addr}/api/v1/notifications/s1/stream"))
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert!(hub.active_channel(&SessionId::parse("s1").unwrap()).is_some());

        stop_tx.send(()).unwrap();

        // The stream body terminates instead of hanging until the grace period
        let mut body = response.bytes_stream();
        let ended = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(chunk) = body.next().await {
                if chunk.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(ended.is_ok());

        tokio::time::timeout(Duration::from_secs(3), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(hub.active_channel_count(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_with_server() {
        let mut config = test_config();
        config.notifications.idle_session_ttl_seconds = 1;
        config.notifications.sweep_interval_seconds = 1;

        let server = NotifyServer::bind(config).await.unwrap();
        let running = tokio::spawn(server.run_until(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }));

        tokio::time::timeout(Duration::from_secs(3), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
