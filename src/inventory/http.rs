//! HTTP cloud inventory
//!
//! Reads JSON arrays from `GET {base}/instances`, `/volumes`,
//! `/security-groups` and `/flavors`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::trace;

use super::{CloudInventory, Flavor, Instance, SecurityGroup, Volume};
use crate::error::CollectionError;

pub struct HttpInventory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpInventory {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CollectionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn list<T: DeserializeOwned>(&self, resource: &str) -> Result<Vec<T>, CollectionError> {
        let url = format!("{}/{}", self.base_url, resource);
        trace!("requesting {resource} from {url}");

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
}

#[async_trait]
impl CloudInventory for HttpInventory {
    async fn instances(&self) -> Result<Vec<Instance>, CollectionError> {
        self.list("instances").await
    }

    async fn volumes(&self) -> Result<Vec<Volume>, CollectionError> {
        self.list("volumes").await
    }

    async fn security_groups(&self) -> Result<Vec<SecurityGroup>, CollectionError> {
        self.list("security-groups").await
    }

    async fn flavors(&self) -> Result<Vec<Flavor>, CollectionError> {
        self.list("flavors").await
    }
}
