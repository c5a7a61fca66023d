//! Waypost - forward HTTP proxy
//!
//! Core library: request filtering, CONNECT tunneling, byte relaying and the
//! bounded worker pool that serves connections.

pub mod auth;
pub mod config;
pub mod filter;
pub mod http;
pub mod proxy;
pub mod server;
