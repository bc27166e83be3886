pub mod builder;
pub mod conditional;
pub mod error;
pub mod not_found;
pub mod proxy;
pub mod router;
pub mod static_files;

pub use builder::build_router;
pub use error::{BuildError, BuildResult};
pub use not_found::NotFound;
pub use proxy::{ProxySettings, ProxyTarget, ReverseProxy};
pub use router::{Router, RouterBuilder};
pub use static_files::{ExportSource, StaticExport, StaticFileServer, StaticSettings};
