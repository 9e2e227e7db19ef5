// Library modules
pub mod api;
pub mod config;
pub mod mux;
pub mod rpc;
pub mod server;
pub mod sysinfo;
pub mod telemetry;
pub mod terminal;

// Re-export commonly used types
pub use config::Config;
pub use mux::BinaryMux;
pub use rpc::Dispatcher;
pub use server::Server;
pub use terminal::TerminalPool;
