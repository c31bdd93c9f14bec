//! Ferry client: lists the files a server offers and downloads them over the
//! datagram channel.

pub mod config;
pub mod control;
pub mod downloads;
pub mod error;

pub use config::ClientConfig;
pub use control::{ControlClient, DownloadOffer};
pub use downloads::{Downloads, check_outcome};
pub use error::ClientError;
