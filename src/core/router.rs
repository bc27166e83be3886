//! Ordered, first-match-wins pattern router.
//!
//! The table is immutable once built, so a single `Router` is shared by every
//! connection without any locking.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use regex::Regex;

use crate::{
    core::error::{BuildError, BuildResult},
    ports::RequestHandler,
};

/// The catch-all pattern every table must contain.
pub const DEFAULT_PATTERN: &str = "/";

struct Route {
    pattern: String,
    regex: Regex,
    handler: Arc<dyn RequestHandler>,
}

/// Compile a route pattern so it only matches at the start of the path.
pub(crate) fn compile_anchored(pattern: &str) -> BuildResult<Regex> {
    Regex::new(&format!("^(?:{pattern})")).map_err(|source| BuildError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

pub struct Router {
    routes: Vec<Route>,
    default: Arc<dyn RequestHandler>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Patterns in evaluation order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.pattern.as_str())
    }

    /// Pick the handler for `path`: the first matching pattern in declared
    /// order, or the `/` handler when nothing matches.
    pub fn select(&self, path: &str) -> (&str, &Arc<dyn RequestHandler>) {
        self.routes
            .iter()
            .find(|route| route.regex.is_match(path))
            .map(|route| (route.pattern.as_str(), &route.handler))
            .unwrap_or((DEFAULT_PATTERN, &self.default))
    }

    pub async fn dispatch(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let (pattern, handler) = self.select(req.uri().path());
        tracing::debug!(route = pattern, path = req.uri().path(), "Route selected");
        handler.handle(req).await
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl RequestHandler for Router {
    async fn handle(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        self.dispatch(req).await
    }
}

/// Collects `(pattern, handler)` pairs in insertion order.
#[derive(Default)]
pub struct RouterBuilder {
    routes: Vec<(String, Arc<dyn RequestHandler>)>,
}

impl RouterBuilder {
    pub fn route(mut self, pattern: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        self.routes.push((pattern.into(), handler));
        self
    }

    pub fn build(self) -> BuildResult<Router> {
        let mut routes: Vec<Route> = Vec::with_capacity(self.routes.len());

        for (pattern, handler) in self.routes {
            if routes.iter().any(|route| route.pattern == pattern) {
                return Err(BuildError::DuplicatePattern(pattern));
            }
            let regex = compile_anchored(&pattern)?;
            routes.push(Route {
                pattern,
                regex,
                handler,
            });
        }

        let default = routes
            .iter()
            .find(|route| route.pattern == DEFAULT_PATTERN)
            .map(|route| route.handler.clone())
            .ok_or(BuildError::MissingDefaultRoute)?;

        Ok(Router { routes, default })
    }
}
