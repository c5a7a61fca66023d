//! HTTP/1.x framing for the proxy.
//!
//! Only request heads are parsed. Bodies, upstream responses and tunneled
//! traffic are never interpreted; they flow through the dispatcher as raw
//! bytes.
//!
//! - **`connection`**: a client connection with its read-ahead buffer
//! - **`parser`**: request line and header block parsing
//! - **`request`**: parsed request head and target resolution
//! - **`response`**: locally generated responses with a builder
//! - **`writer`**: serialization of responses and forwarded request heads
//!
//! # Connection lifecycle
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← read until the request head is complete
//!        └──────┬──────┘
//!               │ Request parsed
//!               ▼
//!        ┌──────────────────┐
//!        │   Filtering      │ ← Forwarded, Certbot, Auth
//!        └──────┬───────────┘
//!               ├─ Local response → Closed
//!               ▼
//!        ┌──────────────────┐
//!        │   Relaying       │ ← Tunnel or Forward, raw bytes both ways
//!        └──────┬───────────┘
//!               │ Either side closes
//!               └─ Closed
//! ```

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
