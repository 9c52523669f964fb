//! Panorama metadata providers
//!
//! The cache fetches through the `PanoramaDataProvider` trait so the
//! backing source is pluggable: the Street View metadata endpoint in
//! production, an in-memory fixture set for the CLI and tests.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{NavError, NavResult};
use crate::types::{LatLng, PanoramaMetadata};

/// Source of panorama metadata
///
/// Implementations must be Send + Sync for use in async contexts.
#[async_trait]
pub trait PanoramaDataProvider: Send + Sync {
    /// Fetch metadata for one panorama. May suspend on network I/O.
    async fn fetch(&self, panorama_id: &str) -> NavResult<PanoramaMetadata>;
}

// =============================================================================
// HTTP PROVIDER
// =============================================================================

/// Street View metadata endpoint response
#[derive(Debug, Deserialize)]
struct MetadataResponse {
    status: String,
    #[serde(default)]
    pano_id: Option<String>,
    #[serde(default)]
    location: Option<LatLng>,
    #[serde(default)]
    copyright: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl MetadataResponse {
    fn into_metadata(self, requested: &str) -> NavResult<PanoramaMetadata> {
        if self.status != "OK" {
            return Err(NavError::fetch(
                requested,
                format!("provider status {}", self.status),
            ));
        }
        Ok(PanoramaMetadata {
            pano_id: self.pano_id.unwrap_or_default(),
            position: self.location,
            description: String::new(),
            // The metadata endpoint does not report adjacency links
            links: Vec::new(),
            copyright: self.copyright.unwrap_or_default(),
            image_date: self.date.unwrap_or_default(),
        })
    }
}

/// Provider backed by the Street View metadata HTTP endpoint
pub struct HttpPanoramaProvider {
    client: reqwest::Client,
    metadata_url: String,
    api_key: String,
}

impl HttpPanoramaProvider {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> NavResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NavError::fetch("-", e))?;
        Ok(Self {
            client,
            metadata_url: format!("{}/metadata", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    /// Build from config, reading the API key from the configured env var
    pub fn from_config(config: &ProviderConfig) -> NavResult<Self> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_else(|_| {
            warn!(env = %config.api_key_env, "API key not set, requests will be unauthenticated");
            String::new()
        });
        Self::new(
            &config.base_url,
            api_key,
            Duration::from_millis(config.request_timeout_ms),
        )
    }
}

#[async_trait]
impl PanoramaDataProvider for HttpPanoramaProvider {
    async fn fetch(&self, panorama_id: &str) -> NavResult<PanoramaMetadata> {
        debug!(panorama_id, url = %self.metadata_url, "Fetching panorama metadata");

        let response = self
            .client
            .get(&self.metadata_url)
            .query(&[("pano", panorama_id), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| NavError::fetch(panorama_id, e))?
            .error_for_status()
            .map_err(|e| NavError::fetch(panorama_id, e))?;

        let body: MetadataResponse = response
            .json()
            .await
            .map_err(|e| NavError::fetch(panorama_id, e))?;

        body.into_metadata(panorama_id)
    }
}

// =============================================================================
// IN-MEMORY PROVIDER
// =============================================================================

/// Fixture-backed provider with optional simulated latency
#[derive(Debug, Default)]
pub struct InMemoryPanoramaProvider {
    panoramas: HashMap<String, PanoramaMetadata>,
    latency: Duration,
}

impl InMemoryPanoramaProvider {
    pub fn new(panoramas: impl IntoIterator<Item = PanoramaMetadata>) -> Self {
        Self {
            panoramas: panoramas
                .into_iter()
                .map(|p| (p.pano_id.clone(), p))
                .collect(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Load fixtures from a JSON array of panorama metadata
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let panoramas: Vec<PanoramaMetadata> = serde_json::from_str(&content)?;
        Ok(Self::new(panoramas))
    }

    pub fn len(&self) -> usize {
        self.panoramas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panoramas.is_empty()
    }
}

#[async_trait]
impl PanoramaDataProvider for InMemoryPanoramaProvider {
    async fn fetch(&self, panorama_id: &str) -> NavResult<PanoramaMetadata> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.panoramas
            .get(panorama_id)
            .cloned()
            .ok_or_else(|| NavError::fetch(panorama_id, "ZERO_RESULTS"))
    }
}
