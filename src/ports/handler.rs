use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};

/// RequestHandler is the contract every route target fulfils.
///
/// Handlers never fail. Resolution misses go to a fallback handler and
/// upstream failures become 5xx responses.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, req: Request<AxumBody>) -> Response<AxumBody>;
}
