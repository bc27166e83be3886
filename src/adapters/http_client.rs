use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::{
    config::ProxyTlsConfig,
    ports::http_client::{HttpClient, HttpClientError, HttpClientProvider, HttpClientResult},
};

/// HTTP client adapter using Hyper with Rustls.
///
/// Requests go out as HTTP/1.1 over plain TCP or TLS depending on the URI
/// scheme. The trust store is the platform's native roots plus, optionally, one
/// extra PEM bundle for targets that use a private CA.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a client trusting the native roots only.
    pub fn new() -> HttpClientResult<Self> {
        Self::with_tls(None)
    }

    /// Create a client for a target's TLS settings.
    pub fn with_tls(tls: Option<&ProxyTlsConfig>) -> HttpClientResult<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        if let Some(ca_path) = tls.and_then(|tls| tls.ca_cert.as_deref()) {
            let added = Self::add_pem_bundle(&mut root_cert_store, ca_path)?;
            tracing::info!(ca_cert = ca_path, added, "Trusting extra CA certificates");
        }

        tracing::debug!("Loaded {} root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        Ok(Self { client })
    }

    fn add_pem_bundle(store: &mut rustls::RootCertStore, path: &str) -> HttpClientResult<usize> {
        let file = File::open(path)
            .map_err(|e| HttpClientError::Tls(format!("cannot open CA bundle {path}: {e}")))?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HttpClientError::Tls(format!("cannot parse CA bundle {path}: {e}")))?;

        if certs.is_empty() {
            return Err(HttpClientError::Tls(format!(
                "CA bundle {path} contains no certificates"
            )));
        }

        let (added, _ignored) = store.add_parsable_certificates(certs);
        Ok(added)
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        limit: Duration,
    ) -> HttpClientResult<Response<AxumBody>> {
        if req.uri().host().is_none() {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        }

        let method = req.method().clone();
        let uri = req.uri().clone();

        let span = tracing::debug_span!(
            "backend_request",
            http.method = %method,
            http.uri = %uri,
            http.status_code = tracing::field::Empty,
        );

        match timeout(limit, self.client.request(req))
            .instrument(span.clone())
            .await
        {
            Ok(Ok(response)) => {
                span.record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed downstream
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Ok(Err(e)) => Err(HttpClientError::ConnectionError(format!(
                "Request to {method} {uri} failed: {e}"
            ))),
            Err(_) => Err(HttpClientError::Timeout(limit)),
        }
    }
}

/// Shares one client across plain targets and builds one per distinct TLS
/// configuration.
pub struct HttpClientFactory {
    default: Arc<dyn HttpClient>,
    by_tls: Mutex<HashMap<Option<String>, Arc<dyn HttpClient>>>,
}

impl HttpClientFactory {
    pub fn new() -> HttpClientResult<Self> {
        Ok(Self {
            default: Arc::new(HttpClientAdapter::new()?),
            by_tls: Mutex::new(HashMap::new()),
        })
    }
}

impl HttpClientProvider for HttpClientFactory {
    fn client_for(&self, tls: Option<&ProxyTlsConfig>) -> HttpClientResult<Arc<dyn HttpClient>> {
        let Some(tls) = tls.filter(|tls| tls.ca_cert.is_some()) else {
            return Ok(self.default.clone());
        };

        let mut clients = self
            .by_tls
            .lock()
            .map_err(|_| HttpClientError::Tls("client cache poisoned".to_string()))?;

        if let Some(client) = clients.get(&tls.ca_cert) {
            return Ok(client.clone());
        }

        let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::with_tls(Some(tls))?);
        clients.insert(tls.ca_cert.clone(), client.clone());
        Ok(client)
    }
}
