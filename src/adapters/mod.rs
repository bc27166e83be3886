pub mod backend_process;
pub mod file_system;
pub mod http_client;
pub mod http_handler;

/// Re-export commonly used types from adapters
pub use backend_process::{BackendCommand, BackendProcess};
pub use file_system::FileSystemAdapter;
pub use http_client::{HttpClientAdapter, HttpClientFactory};
pub use http_handler::HttpHandler;
