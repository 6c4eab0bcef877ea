//! Application Error Types

use crate::domain::gateways::GatewayError;
use crate::domain::repositories::RepositoryError;

/// Result type for application services.
pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by application services.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
