use crate::{create_router, AppState};
use anyhow::{Context, Result};
use sna_gateway_core::GatewaySettings;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info};

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid listen address {}:{}",
                    settings.server.host, settings.server.port
                )
            })?;
        let state = AppState::new(settings).context("building application state")?;
        Ok(Self { state, addr })
    }

    pub async fn run(self) -> Result<()> {
        let coordinator = self.state.coordinator.clone();
        let router = create_router(self.state);

        let listener = {
            let socket = if self.addr.is_ipv6() {
                tokio::net::TcpSocket::new_v6()
            } else {
                tokio::net::TcpSocket::new_v4()
            }
            .context("creating listen socket")?;

            let _ = socket.set_reuseaddr(true);
            let _ = socket.set_keepalive(true);

            socket
                .bind(self.addr)
                .with_context(|| format!("binding {}", self.addr))?;
            socket.listen(1024).context("listening")?
        };

        info!("SNA gateway listening on http://{}", self.addr);
        info!("  GET  /projects/{{owner}}/{{repo}}/metrics");
        info!("  GET  /artifacts/{{owner}}/{{repo}}/metrics");
        info!("  POST /projects/{{owner}}/{{repo}}/status");
        info!("  GET  /health, GET /metrics");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        coordinator.shutdown();
        info!("Background fetches cancelled");

        served.map_err(|e| {
            error!(error = %e, "Server failed");
            anyhow::Error::new(e).context("serving HTTP")
        })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
