//! Ferry transfer engine: reliable file delivery over UDP.
//!
//! - Stop-and-wait sender: one 1024-byte chunk in flight, resend on ack
//!   timeout or on an ack naming another sequence number
//! - Receiver that gates chunks on the expected sequence number, writes at
//!   the chunk's file offset, acks duplicates and asks for resends on gaps
//! - Ack router that demultiplexes one shared server socket by peer endpoint
//! - Session registry, progress counters and a joinable set of transfer threads

pub mod ack_router;
pub mod error;
pub mod logging;
pub mod progress;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod socket;
pub mod transfers;

pub use ack_router::{AckRoute, AckRouter};
pub use error::TransferError;
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use progress::TransferProgress;
pub use receiver::{ChunkVerdict, ReceiveReport, ReceiveSession, ReceiverConfig, run_receiver};
pub use sender::{SendReport, SenderConfig, run_sender};
pub use session::SessionRegistry;
pub use socket::bind_udp;
pub use transfers::TransferSet;
