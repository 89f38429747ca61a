//! Capability traits for the external systems the pipeline drives.
//!
//! Concrete HTTP and subprocess implementations live in
//! `autopress-connectors`; tests use in-memory fakes.

use async_trait::async_trait;
use autopress_shared::{AutopressError, ContentFields, ContentPayload, FailureKind};
use serde::{Deserialize, Serialize};

/// One listing returned by a scraper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedEntity {
    pub identity_key: String,
    pub content_fields: ContentFields,
}

/// Generator output for one entity.
#[derive(Debug, Clone)]
pub struct GeneratedContent {
    pub payload: ContentPayload,
    pub seo_score: f64,
}

/// A classified collaborator failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CollaboratorError {
    pub kind: FailureKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<CollaboratorError> for AutopressError {
    fn from(e: CollaboratorError) -> Self {
        if e.is_transient() {
            AutopressError::TransientCollaborator {
                kind: e.kind.to_string(),
                message: e.message,
            }
        } else {
            AutopressError::PermanentCollaborator {
                kind: e.kind.to_string(),
                message: e.message,
            }
        }
    }
}

/// A failed `create_post`. When `created_post_id` is set the post exists on
/// the target but a later step (taxonomy, status update) failed, so the
/// caller has to delete it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PublishFailure {
    pub kind: FailureKind,
    pub message: String,
    pub created_post_id: Option<String>,
}

impl PublishFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            created_post_id: None,
        }
    }

    /// A post-processing failure after the post was created.
    pub fn partial(created_post_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::PostProcessing,
            message: message.into(),
            created_post_id: Some(created_post_id.into()),
        }
    }
}

impl From<CollaboratorError> for PublishFailure {
    fn from(e: CollaboratorError) -> Self {
        Self::new(e.kind, e.message)
    }
}

/// Fetches the listings of one category page.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn fetch(&self, category_url: &str) -> Result<Vec<ScrapedEntity>, CollaboratorError>;
}

/// Turns scraped fields into an article payload.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, fields: &ContentFields) -> Result<GeneratedContent, CollaboratorError>;
}

/// Creates and removes posts on the publishing target.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create and publish a post, returning its id on the target.
    async fn create_post(&self, payload: &ContentPayload) -> Result<String, PublishFailure>;

    /// Permanently delete a post.
    async fn delete_post(&self, external_post_id: &str) -> Result<(), CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Simulated generator
// ---------------------------------------------------------------------------

/// Deterministic stand-in used when the real generator is out of quota.
/// Payloads are marked `degraded` and never auto-approved.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedGenerator;

impl SimulatedGenerator {
    const SCORE: f64 = 40.0;

    pub fn render(&self, fields: &ContentFields) -> GeneratedContent {
        let name = fields.name.trim();
        let mut body = format!("<h2>{name}</h2>\n");
        if !fields.description.trim().is_empty() {
            body.push_str(&format!("<p>{}</p>\n", fields.description.trim()));
        }
        if let Some(brand) = fields.brand.as_deref() {
            body.push_str(&format!("<p>Brand: {brand}</p>\n"));
        }
        if let Some(price) = fields.price {
            body.push_str(&format!("<p>Price: {price:.2}</p>\n"));
        }
        if let Some(url) = fields.url.as_deref() {
            body.push_str(&format!("<p><a href=\"{url}\">See the offer</a></p>\n"));
        }

        let meta: String = fields.description.trim().chars().take(155).collect();
        GeneratedContent {
            payload: ContentPayload {
                title: format!("{name}: overview and price"),
                slug: slugify(name),
                body,
                meta_description: meta,
                tags: fields.brand.iter().cloned().collect(),
                category: fields.category.clone(),
                degraded: true,
                extra: serde_json::Value::Null,
            },
            seo_score: Self::SCORE,
        }
    }
}

#[async_trait]
impl Generator for SimulatedGenerator {
    async fn generate(&self, fields: &ContentFields) -> Result<GeneratedContent, CollaboratorError> {
        Ok(self.render(fields))
    }
}

fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}
