pub mod file_system;
pub mod handler;
pub mod http_client;

pub use file_system::{FileSystem, FileSystemError, FileSystemResult, OpenedFile};
pub use handler::RequestHandler;
pub use http_client::{HttpClient, HttpClientError, HttpClientProvider, HttpClientResult};
