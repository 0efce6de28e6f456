//! HTTP sample source
//!
//! Talks to a domain introspection endpoint exposing:
//!
//! - `GET {base}/domains` → `[DomainInfo]`
//! - `GET {base}/domains/{uuid}/stats` → `DomainReading`, 404 once the domain is gone

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::trace;

use super::{DomainInfo, DomainReading, SampleSource};
use crate::error::CollectionError;

pub struct HttpSampleSource {
    base_url: String,

    /// HTTP client (reused across requests)
    client: reqwest::Client,
}

impl HttpSampleSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CollectionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SampleSource for HttpSampleSource {
    async fn list_domains(&self) -> Result<Vec<DomainInfo>, CollectionError> {
        let url = format!("{}/domains", self.base_url);
        trace!("requesting domain list from {url}");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(CollectionError::Unavailable(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn read_domain(&self, uuid: &str) -> Result<DomainReading, CollectionError> {
        let url = format!("{}/domains/{}/stats", self.base_url, uuid);
        trace!("requesting domain stats from {url}");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(CollectionError::Vanished(uuid.to_string())),
            status if !status.is_success() => Err(CollectionError::Unavailable(format!(
                "GET {} returned {}",
                url, status
            ))),
            _ => Ok(response.json().await?),
        }
    }
}
