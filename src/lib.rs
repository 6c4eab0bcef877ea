//! Housewatch Backend Library
//!
//! Household surveillance episodic memory pipeline: a per-clip vision
//! micro-pipeline with identity resolution, temporal event fusion,
//! LLM-grounded narration, transactional persistence, daily rollups and
//! retrieval-backed question answering.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture principles:
//! - **Domain**: Core entities, value objects and abstractions
//! - **Application**: Pipeline stage services and run orchestrators
//! - **Infrastructure**: Postgres, ffmpeg, model service and LLM clients
//!
//! # References
//!
//! - Clean Architecture: https://blog.cleancoder.com/uncle-bob/2012/08/13/the-clean-architecture.html

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::pipeline;
pub use application::services;
pub use domain::entities;
pub use domain::gateways;
pub use domain::repositories;
pub use domain::value_objects;
pub use infrastructure::config::AppConfig;
pub use infrastructure::database;
