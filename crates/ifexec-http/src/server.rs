//! HTTP server implementation using Axum.

use crate::config::HttpExecutorConfig;
use crate::handler::{handle_health, handle_request};
use axum::{routing::get, Router};
use ifexec::Executor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub executor: Arc<Executor>,
    pub config: HttpExecutorConfig,
}

/// Build the router serving `executor` below the configured subpath.
pub fn router(executor: Arc<Executor>, config: HttpExecutorConfig) -> Router {
    let state = Arc::new(AppState { executor, config });

    Router::new()
        .route("/health", get(handle_health))
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until the server fails.
pub async fn serve(
    listener: TcpListener,
    executor: Arc<Executor>,
    config: HttpExecutorConfig,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("HTTP executor listening on {} at {}", addr, config.subpath());

    let app = router(executor, config);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Bind `host:port` and serve in the background.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    executor: Arc<Executor>,
    config: HttpExecutorConfig,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = serve(listener, executor, config).await {
            error!("HTTP executor server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ifexec::{ExecutorOptions, StaticContracts};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_server_starts() {
        let executor = Arc::new(Executor::new(
            ExecutorOptions::default(),
            Arc::new(StaticContracts::new()),
        ));

        let addr = start_server(executor, HttpExecutorConfig::default(), "127.0.0.1", 0)
            .await
            .unwrap();
        assert!(addr.port() > 0);

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#"{"status":"ok"}"#));
    }
}
