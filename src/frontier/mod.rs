//! Frontier front-ends
//!
//! - [`FrontierManager`] runs the whole frontier in one process on top of a
//!   [`Backend`](crate::storage::Backend).
//! - [`MessageBusBackend`] is the downloader's view of a distributed frontier.
//! - [`OverusedBuffer`] sits in front of either and holds back requests for
//!   slots the downloader reports as overused.

mod manager;
mod messagebus;
mod overused;

pub use manager::FrontierManager;
pub use messagebus::{aggregate_per_host, MessageBusBackend};
pub use overused::OverusedBuffer;
