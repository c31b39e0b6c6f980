//! HTTP binding for the ifexec interface executor.
//!
//! Turns HTTP requests into executor calls and writes the response envelope,
//! or the raw result, back to the client.
//!
//! # Example
//!
//! ```rust,ignore
//! use ifexec::{Executor, ExecutorOptions, SpecDirLoader};
//! use ifexec_http::{serve, HttpExecutorConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = Arc::new(Executor::new(
//!         ExecutorOptions::new().with_spec_dir("specs"),
//!         Arc::new(SpecDirLoader::new()),
//!     ));
//!     // executor.register(...)?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     serve(listener, executor, HttpExecutorConfig::new().with_subpath("/ftn")).await
//! }
//! ```

pub mod channel;
pub mod config;
pub mod handler;
pub mod server;

pub use channel::{CookieOptions, HttpChannel};
pub use config::HttpExecutorConfig;
pub use server::{router, serve, start_server, AppState};
