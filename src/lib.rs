//! devgate - a local front-end request router for application development.
//!
//! devgate listens on one port and sends every request to exactly one handler:
//! a cached static-asset server for the configured URL patterns, or a reverse
//! proxy in front of the backend application. It mirrors the URL-to-handler
//! mapping of a production routing layer so an application can be run locally
//! with the same layout it has in deployment.
//!
//! # Features
//! - Ordered, first-match-wins regex route table with a mandatory `/` catch-all
//! - Static exports (directory, single file, regex substitution) with ETag,
//!   `Last-Modified` and `Cache-Control`, plus conditional GET (304)
//! - Prefix-based reverse proxy with streaming bodies, Host rewriting, extra
//!   headers, prefix stripping and per-target TLS trust
//! - Optional launcher for the backend command
//! - Structured logging via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use devgate::{FileSystemAdapter, HttpClientFactory, HttpHandler, core::build_router};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = devgate::config::load_config("devgate.yaml").await?;
//! let router = build_router(&cfg, Arc::new(FileSystemAdapter::new()), &HttpClientFactory::new()?)?;
//! let app = HttpHandler::new(Arc::new(router)).into_app();
//! let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the dispatch logic inside `core`. Every route target implements
//! [`ports::RequestHandler`]; handlers never fail, misses go to a fallback
//! handler and upstream failures become 5xx responses.
//!
//! # Error Handling
//! Startup paths return `eyre::Result<T>` or [`core::BuildError`]. Adapters use
//! their port's `thiserror` error type.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{
        BackendCommand, FileSystemAdapter, HttpClientAdapter, HttpClientFactory, HttpHandler,
    },
    core::{Router, build_router},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
