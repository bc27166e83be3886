//! Static exports with conditional-GET caching.
//!
//! A `StaticFileServer` owns an ordered list of exports. Each export is tried
//! with three branches in fixed precedence:
//! 1. the pattern as a regex, rewriting the path through the export's source
//!    template (`\1` style back-references allowed),
//! 2. the pattern as a literal path, loading the export's anchor file,
//! 3. the pattern as a directory prefix, loading the remainder under the root.
//!
//! The first candidate that names an existing regular file wins. Anything that
//! does not produce a readable file is handed to the fallback handler.
use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{
    HeaderMap, Request, Response, StatusCode,
    header::{self, HeaderName, HeaderValue},
    http::request::Parts,
};
use regex::Regex;
use tokio_util::io::ReaderStream;

use crate::{
    config::StaticFilesConfig,
    core::{
        conditional::{generate_etag, http_date, is_resource_modified},
        error::{BuildError, BuildResult},
        router::compile_anchored,
    },
    ports::{FileSystem, RequestHandler},
};

/// Where an export reads from: a single path, or a root plus anchor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSource {
    /// A file or a directory; which one is decided when the export is built
    Path(String),
    /// A directory root whose `anchor` file answers exact matches
    Anchored { root: String, anchor: String },
}

#[derive(Debug, Clone)]
enum Loader {
    File(PathBuf),
    Directory(PathBuf),
    Anchored { root: PathBuf, anchor: PathBuf },
}

impl Loader {
    fn exact(&self) -> Option<PathBuf> {
        match self {
            Loader::File(file) => Some(file.clone()),
            Loader::Directory(_) => None,
            Loader::Anchored { root, anchor } => Some(root.join(anchor)),
        }
    }

    fn relative(&self, rest: &str) -> Option<PathBuf> {
        match self {
            Loader::File(file) => Some(file.clone()),
            Loader::Directory(root) | Loader::Anchored { root, .. } => safe_join(root, rest),
        }
    }
}

/// Join a URL remainder onto `root`, refusing anything that climbs out of it.
fn safe_join(root: &Path, rest: &str) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    for segment in rest.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => joined.push(s),
        }
    }
    Some(joined)
}

/// Turn a source string into a regex replacement template.
///
/// Literal `$` is escaped and `\N` back-references become `${N}`.
fn substitution_template(source: &str) -> String {
    let escaped = source.replace('$', "$$");
    let mut template = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            template.push_str("${");
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                template.push(d);
                chars.next();
            }
            template.push('}');
        } else {
            template.push(c);
        }
    }
    template
}

/// One pattern-to-location export.
#[derive(Debug, Clone)]
pub struct StaticExport {
    pattern: String,
    regex: Regex,
    /// Built from the original source string, before loader classification
    template: String,
    loader: Loader,
}

impl StaticExport {
    pub fn new(pattern: impl Into<String>, source: ExportSource) -> BuildResult<Self> {
        let pattern = pattern.into();
        let regex = compile_anchored(&pattern)?;

        let (template, loader) = match source {
            ExportSource::Path(path) => {
                let loader = if Path::new(&path).is_file() {
                    Loader::File(PathBuf::from(&path))
                } else {
                    Loader::Directory(PathBuf::from(&path))
                };
                (substitution_template(&path), loader)
            }
            ExportSource::Anchored { root, anchor } => (
                substitution_template(&root),
                Loader::Anchored {
                    root: PathBuf::from(root),
                    anchor: PathBuf::from(anchor),
                },
            ),
        };

        Ok(Self {
            pattern,
            regex,
            template,
            loader,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Candidate files for `path`, in branch precedence order.
    fn candidates(&self, path: &str) -> Vec<PathBuf> {
        let mut candidates = Vec::with_capacity(3);

        if self.regex.is_match(path) {
            let rewritten = self.regex.replacen(path, 1, self.template.as_str());
            let rewritten = PathBuf::from(rewritten.as_ref());
            if !rewritten.components().any(|c| c == Component::ParentDir) {
                candidates.push(rewritten);
            }
        }

        if self.pattern == path {
            candidates.extend(self.loader.exact());
        }

        let prefix = if self.pattern.ends_with('/') {
            self.pattern.clone()
        } else {
            format!("{}/", self.pattern)
        };
        if let Some(rest) = path.strip_prefix(prefix.as_str()) {
            candidates.extend(self.loader.relative(rest));
        }

        candidates
    }
}

/// Tunables shared by every static export.
#[derive(Debug, Clone)]
pub struct StaticSettings {
    pub cache: bool,
    pub cache_timeout: Duration,
    pub fallback_mimetype: String,
    pub chunk_size: usize,
    pub disallow: Vec<Regex>,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            cache: true,
            cache_timeout: Duration::from_secs(60 * 60 * 12),
            fallback_mimetype: "application/octet-stream".to_string(),
            chunk_size: 8192,
            disallow: Vec::new(),
        }
    }
}

impl StaticSettings {
    pub fn from_config(config: &StaticFilesConfig) -> BuildResult<Self> {
        let disallow = config
            .disallow
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| BuildError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<BuildResult<Vec<_>>>()?;

        Ok(Self {
            cache: config.cache,
            cache_timeout: Duration::from_secs(config.cache_timeout_secs),
            fallback_mimetype: config.fallback_mimetype.clone(),
            chunk_size: config.chunk_size.max(1),
            disallow,
        })
    }

    fn is_allowed(&self, filename: &str) -> bool {
        !self.disallow.iter().any(|re| re.is_match(filename))
    }
}

/// Content type by extension; textual types get a UTF-8 charset.
pub fn content_type_for(path: &Path, fallback: &str) -> String {
    let mime = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(fallback);

    let wants_charset = mime.starts_with("text/")
        || mime.ends_with("+xml")
        || matches!(
            mime,
            "application/javascript"
                | "application/ecmascript"
                | "application/json"
                | "application/sql"
                | "application/xml"
        );

    if wants_charset && !mime.contains("charset") {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

/// Result of trying to answer a request from the exports.
pub enum StaticOutcome {
    Served(Response<AxumBody>),
    /// A file was resolved but could not be opened
    Unreadable(PathBuf),
    Unmatched,
}

pub struct StaticFileServer<F: FileSystem> {
    exports: Vec<StaticExport>,
    settings: StaticSettings,
    file_system: Arc<F>,
    fallback: Arc<dyn RequestHandler>,
}

impl<F: FileSystem> StaticFileServer<F> {
    pub fn new(
        exports: Vec<StaticExport>,
        settings: StaticSettings,
        file_system: Arc<F>,
        fallback: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            exports,
            settings,
            file_system,
            fallback,
        }
    }

    pub fn exports(&self) -> &[StaticExport] {
        &self.exports
    }

    /// Walk the exports and return the first candidate that is a real file.
    pub async fn resolve(&self, path: &str) -> Option<PathBuf> {
        for export in &self.exports {
            for candidate in export.candidates(path) {
                if self.file_system.is_file(&candidate).await {
                    tracing::debug!(
                        export = export.pattern(),
                        file = %candidate.display(),
                        "Static export resolved"
                    );
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Serve `req` from the exports, or hand it to `fallback`.
    pub async fn serve(
        &self,
        req: Request<AxumBody>,
        fallback: &dyn RequestHandler,
    ) -> Response<AxumBody> {
        let (parts, body) = req.into_parts();
        match self.try_serve(&parts).await {
            StaticOutcome::Served(response) => response,
            StaticOutcome::Unreadable(path) => {
                tracing::debug!(file = %path.display(), "Resolved file unreadable, falling through");
                fallback.handle(Request::from_parts(parts, body)).await
            }
            StaticOutcome::Unmatched => fallback.handle(Request::from_parts(parts, body)).await,
        }
    }

    pub async fn try_serve(&self, parts: &Parts) -> StaticOutcome {
        // Exports see the decoded path; `..` checks run on the decoded form
        let Ok(decoded) = urlencoding::decode(parts.uri.path()) else {
            tracing::debug!(path = parts.uri.path(), "Request path is not UTF-8 once decoded");
            return StaticOutcome::Unmatched;
        };
        let Some(path) = self.resolve(&decoded).await else {
            return StaticOutcome::Unmatched;
        };

        let filename = path.to_string_lossy().into_owned();
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        if !self.settings.is_allowed(&basename) {
            tracing::debug!(file = %filename, "Static file disallowed");
            return StaticOutcome::Unmatched;
        }

        let content_type = content_type_for(&path, &self.settings.fallback_mimetype);

        let file = match self.file_system.open(&path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(file = %filename, error = %e, "Failed to open static file");
                return StaticOutcome::Unreadable(path);
            }
        };

        let now = SystemTime::now();
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, header::DATE, http_date(now));

        if self.settings.cache {
            let timeout = self.settings.cache_timeout;
            let etag = generate_etag(file.modified, file.size, &filename);
            insert_header(&mut headers, header::ETAG, format!("\"{etag}\""));
            insert_header(
                &mut headers,
                header::CACHE_CONTROL,
                format!("max-age={}, public", timeout.as_secs()),
            );

            if !is_resource_modified(&parts.method, &parts.headers, &etag, file.modified) {
                drop(file);
                return StaticOutcome::Served(with_headers(
                    StatusCode::NOT_MODIFIED,
                    headers,
                    AxumBody::empty(),
                ));
            }

            insert_header(&mut headers, header::EXPIRES, http_date(now + timeout));
        } else {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public"));
        }

        insert_header(&mut headers, header::CONTENT_TYPE, content_type);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
        insert_header(&mut headers, header::LAST_MODIFIED, http_date(file.modified));

        let stream = ReaderStream::with_capacity(file.reader, self.settings.chunk_size);
        StaticOutcome::Served(with_headers(
            StatusCode::OK,
            headers,
            AxumBody::from_stream(stream),
        ))
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: String) {
    match HeaderValue::try_from(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => tracing::warn!(header = %name, error = %e, "Dropping unrepresentable header"),
    }
}

fn with_headers(status: StatusCode, headers: HeaderMap, body: AxumBody) -> Response<AxumBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[async_trait]
impl<F: FileSystem> RequestHandler for StaticFileServer<F> {
    async fn handle(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        self.serve(req, self.fallback.as_ref()).await
    }
}
