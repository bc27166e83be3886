use std::{sync::Arc, time::Instant};

use axum::{Router as AxumRouter, body::Body as AxumBody, routing::any};
use hyper::{Request, Response, StatusCode};
use tower_http::catch_panic::CatchPanicLayer;

use crate::core::Router;

/// Inbound HTTP edge: hands every request to the dispatch router and writes
/// one log line per request.
#[derive(Clone)]
pub struct HttpHandler {
    router: Arc<Router>,
}

impl HttpHandler {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn handle_request(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = self.router.dispatch(req).await;

        let status = response.status();
        let duration_ms = started.elapsed().as_millis() as u64;
        if status == StatusCode::OK {
            tracing::info!(
                http.method = %method,
                http.path = %path,
                http.status_code = status.as_u16(),
                duration_ms,
                "{method} {path} {}",
                status.as_u16()
            );
        } else {
            tracing::warn!(
                http.method = %method,
                http.path = %path,
                http.status_code = status.as_u16(),
                duration_ms,
                "{method} {path} {}",
                status.as_u16()
            );
        }

        response
    }

    /// Axum application that routes every path and method through this handler.
    pub fn into_app(self) -> AxumRouter {
        let handler = Arc::new(self);

        let make_request_route = |handler: Arc<HttpHandler>| {
            any(move |req: Request<AxumBody>| {
                let handler = handler.clone();
                async move { handler.handle_request(req).await }
            })
        };

        AxumRouter::new()
            .route("/", make_request_route(handler.clone()))
            .route("/{*path}", make_request_route(handler))
            .layer(CatchPanicLayer::new())
    }
}
