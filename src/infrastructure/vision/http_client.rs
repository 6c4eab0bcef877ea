//! Vision Model HTTP Client
//!
//! Client for the model sidecar providing person detection, face detection
//! and feature encoding. Images travel as base64 JPEG payloads; every call
//! runs under the shared timeout+retry policy.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::gateways::{
    FaceDetection, GatewayError, GatewayResult, PersonDetection, PersonFeatures, VisionModel,
};
use crate::domain::value_objects::{BodyEmbedding, BoundingBox, FaceEmbedding};
use crate::infrastructure::retry::{with_retry, RetryConfig};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub base_url: String,
    pub retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<DetectionPayload>,
}

#[derive(Debug, Deserialize)]
struct DetectionPayload {
    bbox: [i32; 4],
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    face_embedding: Option<Vec<f32>>,
    body_embedding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct FacesResponse {
    #[serde(default)]
    faces: Vec<FacePayload>,
}

#[derive(Debug, Deserialize)]
struct FacePayload {
    bbox: [i32; 4],
    embedding: Vec<f32>,
}

/// HTTP vision model client.
pub struct HttpVisionClient {
    client: Client,
    config: VisionConfig,
}

impl HttpVisionClient {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn post_image<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        image: &[u8],
    ) -> GatewayResult<T> {
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        let request = ImageRequest {
            image: BASE64.encode(image),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("model request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(GatewayError::Model(format!(
                "model service returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::MalformedResponse(format!(
                "model service rejected the request ({status}): {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(format!("bad model response: {e}")))
    }
}

#[async_trait]
impl VisionModel for HttpVisionClient {
    async fn detect_persons(&self, frame_jpeg: &[u8]) -> GatewayResult<Vec<PersonDetection>> {
        let response: DetectResponse = with_retry(&self.config.retry, "detect_persons", || {
            self.post_image("/v1/detect", frame_jpeg)
        })
        .await?;

        Ok(response
            .detections
            .into_iter()
            .map(|d| PersonDetection {
                bbox: BoundingBox::from_array(d.bbox),
                confidence: d.confidence,
            })
            .collect())
    }

    async fn encode_person(&self, crop_jpeg: &[u8]) -> GatewayResult<PersonFeatures> {
        let response: EncodeResponse = with_retry(&self.config.retry, "encode_person", || {
            self.post_image("/v1/encode", crop_jpeg)
        })
        .await?;

        let face_embedding = match response.face_embedding {
            Some(values) => Some(FaceEmbedding::from_vec(values).ok_or_else(|| {
                GatewayError::MalformedResponse(
                    "face embedding has the wrong dimension".to_string(),
                )
            })?),
            None => None,
        };

        let body_embedding = match response.body_embedding {
            Some(values) => Some(BodyEmbedding::from_vec(values).ok_or_else(|| {
                GatewayError::MalformedResponse(
                    "body embedding has the wrong dimension".to_string(),
                )
            })?),
            None => None,
        };

        Ok(PersonFeatures {
            face_embedding,
            body_embedding,
        })
    }

    async fn detect_faces(&self, image_jpeg: &[u8]) -> GatewayResult<Vec<FaceDetection>> {
        let response: FacesResponse = with_retry(&self.config.retry, "detect_faces", || {
            self.post_image("/v1/faces", image_jpeg)
        })
        .await?;

        response
            .faces
            .into_iter()
            .map(|f| {
                let embedding = FaceEmbedding::from_vec(f.embedding).ok_or_else(|| {
                    GatewayError::MalformedResponse(
                        "face embedding has the wrong dimension".to_string(),
                    )
                })?;
                Ok(FaceDetection {
                    bbox: BoundingBox::from_array(f.bbox),
                    embedding,
                })
            })
            .collect()
    }
}
