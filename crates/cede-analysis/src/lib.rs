//! Client-side orchestration of analysis tasks: the engine HTTP client, the
//! bounded status poller, the cancellable watcher, and the result cache.

pub mod cache;
pub mod client;
pub mod error;
pub mod poller;
pub mod watch;

pub use cache::*;
pub use client::*;
pub use error::*;
pub use poller::*;
pub use watch::*;
