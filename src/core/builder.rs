//! Assembles the dispatch table from a [`ServerConfig`].
//!
//! Static handlers become one route each, in declared order, and a catch-all
//! `/` route bound to the reverse proxy is appended last. Non-static handler
//! entries are left to the backend.
use std::{path::Path, sync::Arc};

use crate::{
    config::{HandlerConfig, ProxyTargetConfig, ServerConfig},
    core::{
        error::{BuildError, BuildResult},
        not_found::NotFound,
        proxy::{ProxySettings, ProxyTarget, ReverseProxy},
        router::{DEFAULT_PATTERN, Router},
        static_files::{ExportSource, StaticExport, StaticFileServer, StaticSettings},
    },
    ports::{FileSystem, HttpClientProvider, RequestHandler},
};

/// Route pattern and export for one static handler entry, if it is one.
fn static_route(
    handler: &HandlerConfig,
    app_root: &Path,
) -> BuildResult<Option<(String, StaticExport)>> {
    let (pattern, source) = match (&handler.static_dir, &handler.static_files) {
        (Some(_), Some(_)) => {
            return Err(BuildError::InvalidTarget {
                target: handler.url.clone(),
                reason: "both static_dir and static_files are set".to_string(),
            });
        }
        (Some(dir), None) => (
            format!("{}/.*", handler.url.trim_end_matches('/')),
            app_root.join(dir),
        ),
        (None, Some(files)) => (handler.url.clone(), app_root.join(files)),
        (None, None) => return Ok(None),
    };

    let export = StaticExport::new(
        handler.url.clone(),
        ExportSource::Path(source.to_string_lossy().into_owned()),
    )?;
    Ok(Some((pattern, export)))
}

/// Proxy targets in evaluation order: configured prefixes, then `/`.
fn proxy_targets(config: &ServerConfig) -> Vec<ProxyTargetConfig> {
    let mut targets = config.backend.targets.clone();
    targets.push(config.backend.catch_all_target(DEFAULT_PATTERN));
    targets
}

/// Build the router for `config`.
pub fn build_router<F: FileSystem>(
    config: &ServerConfig,
    file_system: Arc<F>,
    clients: &dyn HttpClientProvider,
) -> BuildResult<Router> {
    let not_found: Arc<dyn RequestHandler> = Arc::new(NotFound);
    let settings = StaticSettings::from_config(&config.static_files)?;
    let app_root = Path::new(&config.app_root);

    let mut builder = Router::builder();
    for handler in &config.handlers {
        if let Some((pattern, export)) = static_route(handler, app_root)? {
            tracing::debug!(pattern = %pattern, url = %handler.url, "Registering static route");
            let server = StaticFileServer::new(
                vec![export],
                settings.clone(),
                file_system.clone(),
                not_found.clone(),
            );
            builder = builder.route(pattern, Arc::new(server));
        }
    }

    let targets = proxy_targets(config)
        .iter()
        .map(|target| ProxyTarget::from_config(target, clients))
        .collect::<BuildResult<Vec<_>>>()?;
    let proxy = ReverseProxy::new(
        targets,
        ProxySettings::from_config(&config.backend),
        not_found,
    );

    builder.route(DEFAULT_PATTERN, Arc::new(proxy)).build()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use hyper::{Request, Response, StatusCode};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        adapters::FileSystemAdapter,
        config::ProxyTlsConfig,
        ports::{HttpClient, HttpClientError, HttpClientResult},
    };

    struct Unreachable;

    #[async_trait]
    impl HttpClient for Unreachable {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
            _timeout: std::time::Duration,
        ) -> HttpClientResult<Response<AxumBody>> {
            Err(HttpClientError::ConnectionError("unreachable".to_string()))
        }
    }

    struct Clients;

    impl HttpClientProvider for Clients {
        fn client_for(
            &self,
            _tls: Option<&ProxyTlsConfig>,
        ) -> HttpClientResult<Arc<dyn HttpClient>> {
            Ok(Arc::new(Unreachable))
        }
    }

    /// Answers 200 and records the `Host` each request carried.
    #[derive(Default)]
    struct HostLog {
        hosts: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for HostLog {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
            _timeout: std::time::Duration,
        ) -> HttpClientResult<Response<AxumBody>> {
            let host = req
                .headers()
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            self.hosts.lock().unwrap().push(host);
            Ok(Response::new(AxumBody::empty()))
        }
    }

    #[derive(Default)]
    struct Recording(Arc<HostLog>);

    impl HttpClientProvider for Recording {
        fn client_for(
            &self,
            _tls: Option<&ProxyTlsConfig>,
        ) -> HttpClientResult<Arc<dyn HttpClient>> {
            Ok(self.0.clone())
        }
    }

    fn config_in(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            app_root: dir.path().to_string_lossy().into_owned(),
            ..ServerConfig::default()
        }
    }

    fn get(path: &str) -> Request<AxumBody> {
        Request::builder().uri(path).body(AxumBody::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_static_handlers_then_catch_all() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("static")).unwrap();
        std::fs::write(dir.path().join("static/app.css"), "body{}").unwrap();
        std::fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();

        let mut config = config_in(&dir);
        config.handlers = vec![
            HandlerConfig::static_dir("/static", "static"),
            HandlerConfig::static_files("/robots.txt", "robots.txt"),
            HandlerConfig {
                url: "/.*".to_string(),
                ..HandlerConfig::default()
            },
        ];

        let router = build_router(&config, Arc::new(FileSystemAdapter::new()), &Clients).unwrap();
        assert_eq!(
            router.patterns().collect::<Vec<_>>(),
            vec!["/static/.*", "/robots.txt", "/"]
        );

        assert_eq!(router.dispatch(get("/static/app.css")).await.status(), StatusCode::OK);
        assert_eq!(router.dispatch(get("/robots.txt")).await.status(), StatusCode::OK);
        assert_eq!(
            router.dispatch(get("/static/missing.css")).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            router.dispatch(get("/api/ping")).await.status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_trailing_slash_directory_url() {
        let dir = TempDir::new().unwrap();
        let (pattern, export) =
            static_route(&HandlerConfig::static_dir("/assets/", "assets"), dir.path())
                .unwrap()
                .unwrap();
        assert_eq!(pattern, "/assets/.*");
        assert_eq!(export.pattern(), "/assets/");
    }

    #[test]
    fn test_backend_targets_precede_catch_all() {
        let mut config = ServerConfig::default();
        config
            .backend
            .targets
            .push(ProxyTargetConfig::new("/api", "http://127.0.0.1:9000/"));

        let prefixes: Vec<_> = proxy_targets(&config)
            .into_iter()
            .map(|t| t.prefix)
            .collect();
        assert_eq!(prefixes, vec!["/api", "/"]);
    }

    #[test]
    fn test_catch_all_host_settings_are_applied() {
        let mut config = ServerConfig::default();
        let catch_all = proxy_targets(&config).pop().unwrap();
        assert_eq!(catch_all.host, None);
        assert!(!catch_all.preserve_host);

        config.backend.preserve_host = true;
        config.backend.host = Some("app.test".to_string());
        let catch_all = proxy_targets(&config).pop().unwrap();
        assert_eq!(catch_all.prefix, "/");
        assert!(catch_all.preserve_host);
        assert_eq!(catch_all.host.as_deref(), Some("app.test"));
    }

    #[tokio::test]
    async fn test_catch_all_preserves_inbound_host() {
        let mut config = ServerConfig::default();
        config.backend.preserve_host = true;
        let clients = Recording::default();
        let router = build_router(&config, Arc::new(FileSystemAdapter::new()), &clients).unwrap();

        let req = Request::builder()
            .uri("/page")
            .header(hyper::header::HOST, "localhost:8080")
            .body(AxumBody::empty())
            .unwrap();
        assert_eq!(router.dispatch(req).await.status(), StatusCode::OK);
        assert_eq!(
            clients.0.hosts.lock().unwrap().as_slice(),
            ["localhost:8080".to_string()]
        );
    }

    #[test]
    fn test_rejects_broken_handlers() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.handlers = vec![HandlerConfig {
            url: "/both".to_string(),
            static_dir: Some("a".to_string()),
            static_files: Some("b".to_string()),
        }];
        assert!(matches!(
            build_router(&config, Arc::new(FileSystemAdapter::new()), &Clients),
            Err(BuildError::InvalidTarget { .. })
        ));

        config.handlers = vec![HandlerConfig::static_files("/(broken", "x")];
        assert!(matches!(
            build_router(&config, Arc::new(FileSystemAdapter::new()), &Clients),
            Err(BuildError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_duplicate_static_url_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.handlers = vec![
            HandlerConfig::static_files("/a.txt", "a.txt"),
            HandlerConfig::static_files("/a.txt", "b.txt"),
        ];
        assert!(matches!(
            build_router(&config, Arc::new(FileSystemAdapter::new()), &Clients),
            Err(BuildError::DuplicatePattern(_))
        ));
    }
}
