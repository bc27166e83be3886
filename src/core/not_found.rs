use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode, header};

use crate::ports::RequestHandler;

/// Terminal handler: every request it sees is answered with a 404 naming the path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFound;

impl NotFound {
    pub fn response_for(path: &str) -> Response<AxumBody> {
        let mut response = Response::new(AxumBody::from(format!(
            "Path not found or invalid: {path}"
        )));
        *response.status_mut() = StatusCode::NOT_FOUND;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

#[async_trait]
impl RequestHandler for NotFound {
    async fn handle(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        Self::response_for(req.uri().path())
    }
}
