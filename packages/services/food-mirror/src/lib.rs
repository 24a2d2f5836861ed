pub mod handlers;
pub mod models;
pub mod clients;
pub mod mapping;
pub mod migrations;
pub mod storage;
pub mod sync;
pub mod config;
pub mod cli;

// Convenient re-exports for tests and external callers
pub use handlers::*;
pub use models::*;
pub use clients::*;
pub use mapping::*;
pub use storage::*;
pub use sync::*;
pub use config::*;
