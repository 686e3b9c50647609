//! HTTP Server for the Administrative API
//!
//! This module serves the router from [`crate::http_router`] with axum.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::http_router::admin_router;
use crate::manager::GlobalOrchestrator;

/// HTTP server for the orchestrator's management API.
///
/// This server:
/// - Serves the routes listed in [`crate::http_router`]
/// - Allows cross-origin requests from any origin
/// - Traces every request through `tracing`
pub struct HttpServer {
    orchestrator: Arc<GlobalOrchestrator>,
}

impl HttpServer {
    pub fn new(orchestrator: Arc<GlobalOrchestrator>) -> Self {
        Self { orchestrator }
    }

    fn app(&self) -> axum::Router {
        admin_router(self.orchestrator.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Binds `addr` and serves until the process ends.
    pub async fn run(self, addr: SocketAddr) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            io::Error::new(e.kind(), format!("Failed to bind to {}: {}", addr, e))
        })?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    ///
    /// In-flight requests are completed before this returns.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Admin API listening on {}", listener.local_addr()?);

        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let orchestrator = GlobalOrchestrator::builder()
            .transport(Arc::new(FakeTransport::default()))
            .build()
            .unwrap();
        orchestrator.start().await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(HttpServer::new(orchestrator.clone()).serve(
            listener,
            async move {
                let _ = stop_rx.await;
            },
        ));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"running\":true"));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        orchestrator.stop().await;
    }
}
