//! Scraper reading JSON listing feeds.
//!
//! A category URL returns either a bare array of items or an object with an
//! `items` array. Each item needs an `id` (or `sku`); items without one fall
//! back to their `url` and are dropped when that is missing too. Fields
//! outside the hashed set are kept as attributes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use autopress_core::{CollaboratorError, ScrapedEntity, Scraper};
use autopress_shared::{ContentFields, FailureKind, FeedSection, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::http::{build_client, classify_transport, status_error};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedBody {
    Wrapped { items: Vec<FeedItem> },
    Bare(Vec<FeedItem>),
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    #[serde(default, alias = "sku")]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(flatten)]
    attributes: BTreeMap<String, serde_json::Value>,
}

impl FeedItem {
    fn into_entity(self) -> Option<ScrapedEntity> {
        let identity_key = self
            .id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.url.clone())?;
        Some(ScrapedEntity {
            identity_key,
            content_fields: ContentFields {
                name: self.name,
                price: self.price,
                description: self.description,
                brand: self.brand,
                category: self.category,
                url: self.url,
                attributes: self.attributes,
            },
        })
    }
}

/// HTTP scraper for JSON listing feeds.
pub struct FeedScraper {
    client: Client,
}

impl FeedScraper {
    pub fn new(config: &FeedSection) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.user_agent, config.timeout_secs)?,
        })
    }
}

fn unreachable(url: &str, detail: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::new(FailureKind::SourceUnreachable, format!("{url}: {detail}"))
}

#[async_trait]
impl Scraper for FeedScraper {
    #[instrument(skip_all, fields(url = %category_url))]
    async fn fetch(&self, category_url: &str) -> std::result::Result<Vec<ScrapedEntity>, CollaboratorError> {
        let response = self
            .client
            .get(category_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| unreachable(category_url, format!("{} ({e})", classify_transport(&e))))?;

        if !response.status().is_success() {
            let err = status_error(category_url, response).await;
            return Err(match err.kind {
                FailureKind::RateLimited => err,
                _ => CollaboratorError::new(FailureKind::SourceUnreachable, err.message),
            });
        }

        let body: FeedBody = response
            .json()
            .await
            .map_err(|e| unreachable(category_url, format!("malformed feed: {e}")))?;
        let items = match body {
            FeedBody::Wrapped { items } | FeedBody::Bare(items) => items,
        };

        let total = items.len();
        let entities: Vec<ScrapedEntity> = items.into_iter().filter_map(FeedItem::into_entity).collect();
        if entities.len() < total {
            warn!(dropped = total - entities.len(), "feed items without an id or url dropped");
        }
        debug!(count = entities.len(), "feed parsed");
        Ok(entities)
    }
}
