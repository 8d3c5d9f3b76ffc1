//! HTTP client for a CLIP scoring endpoint (Azure ML online deployment).
//!
//! One endpoint serves both modalities: the request carries an `image` and a
//! `text` column and the response reports `image_features` and/or
//! `text_features` per row.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::{EmbeddingClient, ImageRef, ensure_dimension, require_text};
use crate::utils::errors::{Result, SearchError};
use crate::utils::types::Embedding;

const SERVICE: &str = "embedding service";
const DEPLOYMENT_HEADER: &str = "azureml-model-deployment";
const MAX_ERROR_BODY: usize = 512;

pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TEXT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ClipEmbedder {
    http: Client,
    endpoint: String,
    api_key: String,
    deployment: Option<String>,
    dimension: usize,
    image_timeout: Duration,
    text_timeout: Duration,
}

impl ClipEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        let api_key = api_key.into();
        if endpoint.trim().is_empty() {
            return Err(SearchError::validation("missing embedding endpoint"));
        }
        if dimension == 0 {
            return Err(SearchError::validation("embedding dimension must be positive"));
        }
        let http = Client::builder()
            .build()
            .map_err(|err| SearchError::upstream(SERVICE, err.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim().to_string(),
            api_key: api_key.trim().to_string(),
            deployment: None,
            dimension,
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
            text_timeout: DEFAULT_TEXT_TIMEOUT,
        })
    }

    /// Routes requests to a named deployment behind the endpoint.
    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        let deployment = deployment.into();
        self.deployment = (!deployment.trim().is_empty()).then_some(deployment);
        self
    }

    pub fn with_timeouts(mut self, image: Duration, text: Duration) -> Self {
        self.image_timeout = image;
        self.text_timeout = text;
        self
    }

    async fn score(
        &self,
        image: Cow<'_, str>,
        text: &str,
        feature: Feature,
        timeout: Duration,
    ) -> Result<Embedding> {
        let body = ScoringRequest {
            input_data: InputData {
                columns: ["image", "text"],
                index: [0],
                data: [[image, Cow::Borrowed(text)]],
            },
        };

        let mut request = self
            .http
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        if let Some(deployment) = &self.deployment {
            request = request.header(DEPLOYMENT_HEADER, deployment);
        }

        let response = request
            .send()
            .await
            .map_err(|err| transport_error(err, timeout))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            warn!(%status, "embedding request rejected");
            return Err(SearchError::upstream(
                SERVICE,
                format!("status {status}: {}", truncate(&body)),
            ));
        }

        let rows: Vec<FeatureRow> = response
            .json()
            .await
            .map_err(|err| transport_error(err, timeout))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::upstream(SERVICE, "response contained no rows"))?;
        let vector = match feature {
            Feature::Image => row.image_features,
            Feature::Text => row.text_features,
        }
        .ok_or_else(|| {
            SearchError::upstream(SERVICE, format!("response is missing {}", feature.field()))
        })?;

        debug!(dim = vector.len(), feature = feature.field(), "received embedding");
        ensure_dimension(self.dimension, vector)
    }
}

#[async_trait]
impl EmbeddingClient for ClipEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "clip"
    }

    async fn embed_image(&self, image: &ImageRef) -> Result<Embedding> {
        image.validate()?;
        let payload = match image {
            ImageRef::Url(url) => Cow::Borrowed(url.trim()),
            ImageRef::Bytes(bytes) => Cow::Owned(STANDARD.encode(bytes)),
        };
        self.score(payload, "", Feature::Image, self.image_timeout)
            .await
    }

    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        let text = require_text(text)?;
        self.score(Cow::Borrowed(""), text, Feature::Text, self.text_timeout)
            .await
    }
}

#[derive(Debug, Clone, Copy)]
enum Feature {
    Image,
    Text,
}

impl Feature {
    fn field(self) -> &'static str {
        match self {
            Feature::Image => "image_features",
            Feature::Text => "text_features",
        }
    }
}

#[derive(Serialize)]
struct ScoringRequest<'a> {
    input_data: InputData<'a>,
}

#[derive(Serialize)]
struct InputData<'a> {
    columns: [&'static str; 2],
    index: [usize; 1],
    data: [[Cow<'a, str>; 2]; 1],
}

#[derive(Debug, Deserialize)]
struct FeatureRow {
    #[serde(default)]
    image_features: Option<Vec<f32>>,
    #[serde(default)]
    text_features: Option<Vec<f32>>,
}

fn transport_error(err: reqwest::Error, limit: Duration) -> SearchError {
    if err.is_timeout() {
        SearchError::Timeout {
            service: SERVICE,
            limit,
        }
    } else {
        SearchError::upstream(SERVICE, err.to_string())
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
