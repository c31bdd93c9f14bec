//! Ferry file server: a TCP control channel that negotiates downloads and a
//! shared UDP socket that delivers them.
//!
//! - `config`: environment-driven settings
//! - `catalog`: the files on offer
//! - `task_queue`: bounded queue and worker pool for control connections
//! - `context`: state shared by one server instance
//! - `handler`: the per-connection command state machine
//! - `server`: accept loop and lifecycle

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod server;
pub mod task_queue;

pub use catalog::{CatalogEntry, DirCatalog, FileCatalog};
pub use config::ServerConfig;
pub use context::ServerContext;
pub use error::ServerError;
pub use server::Server;
pub use task_queue::TaskQueue;
