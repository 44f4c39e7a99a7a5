pub mod config;
pub mod console;
pub mod error;
pub mod error_payload;
pub mod handshake;
pub mod launcher;
pub mod lifecycle;
pub mod port_alloc;
pub mod registry;
pub mod server_logs;
pub mod service;
pub mod store;

pub use error::OrchestratorError;
pub use service::GameInstanceService;
