pub mod cgi_executor;
pub mod file_system;
pub mod handler;
pub mod http_client;
