//! LLM Infrastructure
//!
//! HTTP gateway to the text-generation service.

mod http_gateway;

pub use http_gateway::*;
