//! Gateway Traits
//!
//! Interfaces to the external collaborators the pipeline depends on: the
//! video decoder, the vision model service and the LLM text service. The
//! pipeline only ever sees these traits; HTTP and ffmpeg live in the
//! infrastructure layer.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::value_objects::{BodyEmbedding, BoundingBox, FaceEmbedding};

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error types.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Video decode error: {0}")]
    Decode(String),

    #[error("Model service error: {0}")]
    Model(String),

    #[error("LLM service error: {0}")]
    Llm(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    /// Whether a retry may succeed (transport faults, timeouts, overload).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(_) | Self::Model(_) | Self::Llm(_)
        )
    }
}

/// One frame sampled from a clip, JPEG-encoded.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub index: usize,
    pub jpeg: Vec<u8>,
}

/// Decodes a video and emits frames at an approximate target rate.
#[async_trait]
pub trait VideoSampler: Send + Sync {
    /// Samples frames at `target_fps` by striding round(source_fps /
    /// target_fps) source frames. Also returns the video duration in seconds.
    async fn sample(&self, path: &Path, target_fps: f64)
        -> GatewayResult<(Vec<SampledFrame>, f64)>;
}

/// Extracts a single JPEG snapshot from a stored video.
#[async_trait]
pub trait SnapshotExtractor: Send + Sync {
    async fn extract(&self, video_path: &Path, output_path: &Path) -> GatewayResult<()>;
}

/// A raw person detection from the detection model.
#[derive(Debug, Clone)]
pub struct PersonDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Feature vectors extracted from one person crop.
#[derive(Debug, Clone)]
pub struct PersonFeatures {
    pub face_embedding: Option<FaceEmbedding>,
    pub body_embedding: Option<BodyEmbedding>,
}

/// A detected face with its embedding, used during enrollment.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub embedding: FaceEmbedding,
}

/// The vision model service: person detection plus face/body encoding.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Detects person bounding boxes in a JPEG frame.
    async fn detect_persons(&self, frame_jpeg: &[u8]) -> GatewayResult<Vec<PersonDetection>>;

    /// Extracts face and body embeddings from a person crop.
    async fn encode_person(&self, crop_jpeg: &[u8]) -> GatewayResult<PersonFeatures>;

    /// Detects faces with embeddings in a full reference photo.
    async fn detect_faces(&self, image_jpeg: &[u8]) -> GatewayResult<Vec<FaceDetection>>;
}

/// Generation parameters for one LLM call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The LLM text-generation service.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Submits a (system, user) prompt pair and returns the generated text.
    /// Implementations retry transient failures and raise after exhausting
    /// the retry budget.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: GenerationOptions,
    ) -> GatewayResult<String>;
}
