//! Upstream relaying
//!
//! This module implements the dispatcher used both for forwarding plain
//! HTTP requests and for CONNECT tunnels.

pub mod dispatcher;

pub use dispatcher::{DispatchError, Dispatcher, LocalAddrs, RelayStats};
