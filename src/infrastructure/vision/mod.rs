//! Vision Infrastructure
//!
//! HTTP client for the detection and embedding model service.

mod http_client;

pub use http_client::*;
