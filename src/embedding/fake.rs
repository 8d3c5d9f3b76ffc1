//! Deterministic, offline embedder for tests and local development.
//!
//! Registered fixtures win; any other input gets a unit vector drawn from an
//! RNG seeded with a stable hash of the input, so the same text always maps
//! to the same vector.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::embedding::{EmbeddingClient, ImageRef, ensure_dimension, require_text};
use crate::utils::errors::{Result, SearchError};
use crate::utils::types::Embedding;
use crate::vector::metric::normalize;

pub struct FakeEmbedder {
    dimension: usize,
    texts: HashMap<String, Embedding>,
    images: HashMap<String, Embedding>,
    // Errors handed out, one per call, before any vector is produced.
    failures: Mutex<VecDeque<SearchError>>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            texts: HashMap::new(),
            images: HashMap::new(),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fixed vector for a text query. The vector is returned as given, so a
    /// wrong length surfaces as `DimensionMismatch`.
    pub fn with_text(mut self, text: &str, vector: Embedding) -> Self {
        self.texts.insert(text.trim().to_string(), vector);
        self
    }

    /// Fixed vector for an image URL.
    pub fn with_image(mut self, url: &str, vector: Embedding) -> Self {
        self.images.insert(url.trim().to_string(), vector);
        self
    }

    /// Queues an error for the next call. Queued errors are consumed in order.
    pub fn fail_next(&self, error: SearchError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    /// Number of embed calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock() {
            Ok(mut failures) => failures.pop_front().map_or(Ok(()), Err),
            Err(_) => Ok(()),
        }
    }

    fn seeded(&self, key: &[u8]) -> Embedding {
        let mut rng = StdRng::seed_from_u64(fnv1a(key));
        let raw: Vec<f32> = (0..self.dimension)
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect();
        normalize(&raw)
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "fake"
    }

    async fn embed_image(&self, image: &ImageRef) -> Result<Embedding> {
        image.validate()?;
        self.begin_call()?;
        let vector = match image {
            ImageRef::Url(url) => match self.images.get(url.trim()) {
                Some(v) => v.clone(),
                None => self.seeded(format!("image:{}", url.trim()).as_bytes()),
            },
            ImageRef::Bytes(bytes) => {
                let mut key = b"bytes:".to_vec();
                key.extend_from_slice(bytes);
                self.seeded(&key)
            }
        };
        ensure_dimension(self.dimension, vector)
    }

    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        let text = require_text(text)?;
        self.begin_call()?;
        let vector = match self.texts.get(text) {
            Some(v) => v.clone(),
            None => self.seeded(format!("text:{text}").as_bytes()),
        };
        ensure_dimension(self.dimension, vector)
    }
}

// FNV-1a: stable across processes and platforms, unlike the std hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}
