//! Database Infrastructure
//!
//! PostgreSQL connection management, row models and repositories.

pub mod connection;
pub mod models;
pub mod repositories;
