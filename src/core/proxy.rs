//! Prefix-based reverse proxy.
//!
//! Targets are resolved once at startup into immutable [`ProxyTarget`] records
//! (defaults applied, URL parsed, headers validated, client chosen), so the
//! request path only does a linear `starts_with` scan and header surgery.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use futures_util::StreamExt;
use hyper::{
    HeaderMap, Request, Response, StatusCode, Uri, Version,
    header::{self, HeaderName, HeaderValue},
};
use url::{Position, Url};

use crate::{
    config::{AUTO_HOST, BackendConfig, ProxyTargetConfig},
    core::error::{BuildError, BuildResult},
    ports::{HttpClient, HttpClientError, HttpClientProvider, RequestHandler},
};

/// Headers that only describe the hop between two peers.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// How the outbound `Host` header is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRewrite {
    /// Derived from the destination URL
    Auto,
    /// The inbound `Host` is forwarded unchanged
    Preserve,
    Fixed(HeaderValue),
}

/// A fully resolved proxy target.
#[derive(Clone)]
pub struct ProxyTarget {
    prefix: String,
    destination: Url,
    host: HostRewrite,
    extra_headers: HeaderMap,
    remove_prefix: bool,
    client: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for ProxyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyTarget")
            .field("prefix", &self.prefix)
            .field("destination", &self.destination.as_str())
            .field("host", &self.host)
            .field("extra_headers", &self.extra_headers)
            .field("remove_prefix", &self.remove_prefix)
            .finish_non_exhaustive()
    }
}

impl ProxyTarget {
    /// Resolve a target entry, applying defaults and picking its client.
    pub fn from_config(
        config: &ProxyTargetConfig,
        clients: &dyn HttpClientProvider,
    ) -> BuildResult<Self> {
        let invalid = |reason: String| BuildError::InvalidTarget {
            target: config.target.clone(),
            reason,
        };

        let destination = Url::parse(&config.target).map_err(|e| invalid(e.to_string()))?;
        if !matches!(destination.scheme(), "http" | "https") || destination.host_str().is_none() {
            return Err(invalid("expected an absolute http(s) URL".to_string()));
        }

        let host = if config.preserve_host {
            HostRewrite::Preserve
        } else {
            match config.host.as_deref() {
                None | Some(AUTO_HOST) => HostRewrite::Auto,
                Some(fixed) => HostRewrite::Fixed(
                    HeaderValue::from_str(fixed).map_err(|e| invalid(e.to_string()))?,
                ),
            }
        };

        let mut extra_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let bad_header = || BuildError::InvalidHeader {
                target: config.target.clone(),
                name: name.clone(),
            };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| bad_header())?;
            let value = HeaderValue::from_str(value).map_err(|_| bad_header())?;
            extra_headers.insert(name, value);
        }

        let tls = if destination.scheme() == "https" {
            config.tls.as_ref()
        } else {
            None
        };
        let client = clients.client_for(tls)?;

        Ok(Self {
            prefix: config.prefix.clone(),
            destination,
            host,
            extra_headers,
            remove_prefix: config.remove_prefix,
            client,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn destination(&self) -> &Url {
        &self.destination
    }

    /// `Host` value derived from the destination (`host[:port]`).
    pub fn destination_host(&self) -> &str {
        &self.destination[Position::BeforeHost..Position::AfterPort]
    }

    /// Absolute outbound URI for an inbound path and query.
    pub fn outbound_uri(&self, path: &str, query: Option<&str>) -> Result<Uri, hyper::http::Error> {
        let path = if self.remove_prefix {
            path.strip_prefix(self.prefix.as_str()).unwrap_or(path)
        } else {
            path
        };

        let mut uri = format!(
            "{}{}/{}",
            &self.destination[..Position::BeforePath],
            self.destination.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        if let Some(query) = query {
            uri.push('?');
            uri.push_str(query);
        }

        Ok(Uri::try_from(uri)?)
    }

    /// Build the outbound request from the inbound one.
    pub fn outbound_request(
        &self,
        req: Request<AxumBody>,
    ) -> Result<Request<AxumBody>, hyper::http::Error> {
        let (mut parts, body) = req.into_parts();

        let uri = self.outbound_uri(parts.uri.path(), parts.uri.query())?;
        let inbound_host = parts.headers.get(header::HOST).cloned();

        strip_hop_by_hop(&mut parts.headers);

        let host = match &self.host {
            HostRewrite::Auto => HeaderValue::from_str(self.destination_host())?,
            HostRewrite::Fixed(value) => value.clone(),
            HostRewrite::Preserve => match &inbound_host {
                Some(value) => value.clone(),
                None => HeaderValue::from_str(self.destination_host())?,
            },
        };
        parts.headers.insert(header::HOST, host);

        if let Some(original) = inbound_host {
            parts
                .headers
                .insert(HeaderName::from_static("x-forwarded-host"), original);
        }
        parts.headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static("http"),
        );

        for (name, value) in &self.extra_headers {
            parts.headers.insert(name.clone(), value.clone());
        }

        parts.uri = uri;
        parts.version = Version::HTTP_11;

        Ok(Request::from_parts(parts, body))
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Tunables shared by every target of a proxy.
#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub timeout: Duration,
    pub chunk_size: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            chunk_size: 2 << 13,
        }
    }
}

impl ProxySettings {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            chunk_size: config.chunk_size.max(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RelayError {
    #[error("upstream body error: {0}")]
    Upstream(axum::Error),
    #[error("upstream sent nothing for {0:?}")]
    Idle(Duration),
}

/// Relay an upstream body in pieces of at most `chunk_size` bytes, in order.
///
/// Each upstream read is bounded by `idle`; on expiry the stream ends with an
/// error so the client connection is torn down instead of hanging.
fn relay_body(body: AxumBody, chunk_size: usize, idle: Duration) -> AxumBody {
    let upstream = Box::pin(body.into_data_stream());
    let stream = futures_util::stream::unfold(
        (upstream, Bytes::new(), false),
        move |(mut upstream, mut pending, done)| async move {
            if done {
                return None;
            }
            loop {
                if !pending.is_empty() {
                    let chunk = pending.split_to(pending.len().min(chunk_size));
                    return Some((Ok(chunk), (upstream, pending, false)));
                }
                match tokio::time::timeout(idle, upstream.next()).await {
                    Ok(Some(Ok(bytes))) => pending = bytes,
                    Ok(Some(Err(e))) => {
                        return Some((Err(RelayError::Upstream(e)), (upstream, pending, true)));
                    }
                    Ok(None) => return None,
                    Err(_) => {
                        return Some((Err(RelayError::Idle(idle)), (upstream, pending, true)));
                    }
                }
            }
        },
    );
    AxumBody::from_stream(stream)
}

fn error_response(status: StatusCode) -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from(
        status.canonical_reason().unwrap_or("Upstream error"),
    ));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Forwards requests under its prefixes to the matching target.
pub struct ReverseProxy {
    targets: Vec<ProxyTarget>,
    settings: ProxySettings,
    fallback: Arc<dyn RequestHandler>,
}

impl ReverseProxy {
    pub fn new(
        targets: Vec<ProxyTarget>,
        settings: ProxySettings,
        fallback: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            targets,
            settings,
            fallback,
        }
    }

    pub fn targets(&self) -> &[ProxyTarget] {
        &self.targets
    }

    /// First target, in insertion order, whose prefix starts `path`.
    pub fn select_target(&self, path: &str) -> Option<&ProxyTarget> {
        self.targets
            .iter()
            .find(|target| path.starts_with(target.prefix.as_str()))
    }

    pub async fn forward(
        &self,
        target: &ProxyTarget,
        req: Request<AxumBody>,
    ) -> Response<AxumBody> {
        let outbound = match target.outbound_request(req) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::error!(
                    upstream = %target.destination,
                    error = %e,
                    "Failed to build upstream request"
                );
                return error_response(StatusCode::BAD_GATEWAY);
            }
        };

        tracing::debug!(
            prefix = %target.prefix,
            method = %outbound.method(),
            uri = %outbound.uri(),
            "Forwarding request upstream"
        );

        match target
            .client
            .send_request(outbound, self.settings.timeout)
            .await
        {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                let body = relay_body(body, self.settings.chunk_size, self.settings.timeout);
                Response::from_parts(parts, body)
            }
            Err(HttpClientError::Timeout(after)) => {
                tracing::error!(upstream = %target.destination, ?after, "Upstream timed out");
                error_response(StatusCode::GATEWAY_TIMEOUT)
            }
            Err(e) => {
                tracing::error!(
                    upstream = %target.destination,
                    error = %e,
                    "Upstream request failed"
                );
                error_response(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

#[async_trait]
impl RequestHandler for ReverseProxy {
    async fn handle(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        match self.select_target(req.uri().path()) {
            Some(target) => self.forward(target, req).await,
            None => self.fallback.handle(req).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http_body_util::BodyExt;

    use super::*;
    use crate::{config::ProxyTlsConfig, core::NotFound, ports::HttpClientResult};

    /// Records the outbound request and answers with a canned result.
    #[derive(Default)]
    struct RecordingClient {
        seen: Mutex<Vec<(String, HeaderMap)>>,
        fail: Option<fn() -> HttpClientError>,
        body: &'static str,
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
            _timeout: Duration,
        ) -> HttpClientResult<Response<AxumBody>> {
            self.seen
                .lock()
                .unwrap()
                .push((req.uri().to_string(), req.headers().clone()));
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            let mut response = Response::new(AxumBody::from(self.body));
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            response
                .headers_mut()
                .insert("x-backend", HeaderValue::from_static("yes"));
            Ok(response)
        }
    }

    struct Fixed(Arc<RecordingClient>);

    impl HttpClientProvider for Fixed {
        fn client_for(
            &self,
            _tls: Option<&ProxyTlsConfig>,
        ) -> HttpClientResult<Arc<dyn HttpClient>> {
            Ok(self.0.clone())
        }
    }

    fn proxy_with(configs: Vec<ProxyTargetConfig>, client: Arc<RecordingClient>) -> ReverseProxy {
        let provider = Fixed(client);
        let targets = configs
            .iter()
            .map(|c| ProxyTarget::from_config(c, &provider).unwrap())
            .collect();
        ReverseProxy::new(targets, ProxySettings::default(), Arc::new(NotFound))
    }

    fn request(uri: &str) -> Request<AxumBody> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "localhost:8080")
            .header(header::CONNECTION, "keep-alive, x-hop")
            .header("x-hop", "drop me")
            .header("x-keep", "keep me")
            .body(AxumBody::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_forwards_full_path_and_auto_host() {
        let client = Arc::new(RecordingClient {
            body: "pong",
            ..Default::default()
        });
        let proxy = proxy_with(
            vec![ProxyTargetConfig::new("/", "http://127.0.0.1:9090/")],
            client.clone(),
        );

        let response = proxy.handle(request("/api/ping?x=1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(header::CONNECTION));
        assert_eq!(response.headers()["x-backend"], "yes");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pong");

        let seen = client.seen.lock().unwrap();
        let (uri, headers) = &seen[0];
        assert_eq!(uri, "http://127.0.0.1:9090/api/ping?x=1");
        assert_eq!(headers[header::HOST], "127.0.0.1:9090");
        assert_eq!(headers["x-forwarded-host"], "localhost:8080");
        assert_eq!(headers["x-keep"], "keep me");
        assert!(!headers.contains_key("x-hop"));
        assert!(!headers.contains_key(header::CONNECTION));
    }

    #[tokio::test]
    async fn test_remove_prefix() {
        let client = Arc::new(RecordingClient::default());
        let mut config = ProxyTargetConfig::new("/api", "http://127.0.0.1:9000/base/");
        config.remove_prefix = true;
        let proxy = proxy_with(vec![config], client.clone());

        proxy.handle(request("/api/users")).await;
        proxy.handle(request("/api")).await;

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].0, "http://127.0.0.1:9000/base/users");
        assert_eq!(seen[1].0, "http://127.0.0.1:9000/base/");
    }

    #[tokio::test]
    async fn test_host_variants_and_extra_headers() {
        let client = Arc::new(RecordingClient::default());

        let mut fixed = ProxyTargetConfig::new("/fixed", "http://backend.local/");
        fixed.host = Some("app.example.com".to_string());
        fixed
            .headers
            .insert("x-keep".to_string(), "overridden".to_string());

        let mut preserve = ProxyTargetConfig::new("/keep", "http://backend.local/");
        preserve.preserve_host = true;

        let mut auto = ProxyTargetConfig::new("/auto", "https://backend.local:8443/");
        auto.host = Some(AUTO_HOST.to_string());

        let proxy = proxy_with(vec![fixed, preserve, auto], client.clone());
        proxy.handle(request("/fixed/a")).await;
        proxy.handle(request("/keep/a")).await;
        proxy.handle(request("/auto/a")).await;

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].1[header::HOST], "app.example.com");
        assert_eq!(seen[0].1["x-keep"], "overridden");
        assert_eq!(seen[1].1[header::HOST], "localhost:8080");
        assert_eq!(seen[2].1[header::HOST], "backend.local:8443");
        assert_eq!(seen[2].0, "https://backend.local:8443/auto/a");
    }

    #[tokio::test]
    async fn test_first_prefix_wins_and_fallback() {
        let client = Arc::new(RecordingClient::default());
        let proxy = proxy_with(
            vec![
                ProxyTargetConfig::new("/api", "http://first/"),
                ProxyTargetConfig::new("/api/v2", "http://second/"),
            ],
            client.clone(),
        );

        proxy.handle(request("/api/v2/items")).await;
        assert_eq!(client.seen.lock().unwrap()[0].0, "http://first/api/v2/items");

        let response = proxy.handle(request("/other")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(client.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_failures_map_to_5xx() {
        let refused = Arc::new(RecordingClient {
            fail: Some(|| HttpClientError::ConnectionError("refused by 10.0.0.1".to_string())),
            ..Default::default()
        });
        let proxy = proxy_with(vec![ProxyTargetConfig::new("/", "http://10.0.0.1/")], refused);
        let response = proxy.handle(request("/x")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Bad Gateway");

        let slow = Arc::new(RecordingClient {
            fail: Some(|| HttpClientError::Timeout(Duration::from_secs(1))),
            ..Default::default()
        });
        let proxy = proxy_with(vec![ProxyTargetConfig::new("/", "http://10.0.0.1/")], slow);
        let response = proxy.handle(request("/x")).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_relay_body_chunks_in_order() {
        let body = AxumBody::from("abcdefghij");
        let relayed = relay_body(body, 4, Duration::from_secs(1));
        let chunks: Vec<Bytes> = relayed
            .into_data_stream()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![
            Bytes::from_static(b"abcd"),
            Bytes::from_static(b"efgh"),
            Bytes::from_static(b"ij"),
        ]);
    }

    #[test]
    fn test_targets_resolved_in_order() {
        let mut api = ProxyTargetConfig::new("/api", "http://127.0.0.1:9000/v1");
        api.remove_prefix = true;
        let proxy = proxy_with(
            vec![api, ProxyTargetConfig::new("/", "https://app.local/")],
            Arc::new(RecordingClient::default()),
        );

        let resolved: Vec<_> = proxy
            .targets()
            .iter()
            .map(|t| (t.prefix(), t.destination().as_str()))
            .collect();
        assert_eq!(resolved, vec![
            ("/api", "http://127.0.0.1:9000/v1"),
            ("/", "https://app.local/"),
        ]);
        assert_eq!(proxy.select_target("/api/x").map(ProxyTarget::prefix), Some("/api"));
        assert_eq!(proxy.select_target("/page").map(ProxyTarget::prefix), Some("/"));
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let provider = Fixed(Arc::new(RecordingClient::default()));
        assert!(ProxyTarget::from_config(&ProxyTargetConfig::new("/", "not a url"), &provider).is_err());
        assert!(ProxyTarget::from_config(&ProxyTargetConfig::new("/", "ftp://host/"), &provider).is_err());

        let mut bad_header = ProxyTargetConfig::new("/", "http://host/");
        bad_header
            .headers
            .insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            ProxyTarget::from_config(&bad_header, &provider),
            Err(BuildError::InvalidHeader { .. })
        ));
    }
}
