//! Concrete collaborators for autopress.
//!
//! - [`FeedScraper`]: JSON listing feeds over HTTP
//! - [`BridgeGenerator`]: JSON-lines subprocess running the generation script
//! - [`WordPressPublisher`]: WordPress REST API

pub mod bridge;
pub mod feed;
mod http;
pub mod wordpress;

use std::sync::Arc;

use autopress_core::{Generator, Publisher, Scraper};
use autopress_shared::{AppConfig, Result};

pub use bridge::BridgeGenerator;
pub use feed::FeedScraper;
pub use wordpress::WordPressPublisher;

/// The three collaborators a job runner needs, built from config.
pub struct Connectors {
    pub scraper: Arc<dyn Scraper>,
    pub generator: Arc<dyn Generator>,
    pub publisher: Arc<dyn Publisher>,
    bridge: Arc<BridgeGenerator>,
}

impl Connectors {
    /// Build every connector. Fails when the WordPress section or its
    /// password env var is missing.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let bridge = Arc::new(BridgeGenerator::new(&config.bridge));
        Ok(Self {
            scraper: Arc::new(FeedScraper::new(&config.feed)?),
            generator: bridge.clone(),
            publisher: Arc::new(WordPressPublisher::from_config(config)?),
            bridge,
        })
    }

    /// Stop the generator subprocess, if one was started.
    pub async fn shutdown(&self) {
        self.bridge.shutdown().await;
    }
}
