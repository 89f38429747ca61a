//! Core domain logic for autopress.
//!
//! This crate ties the store and the external collaborators together:
//! fingerprinting scraped entities, the article ledger, the publication
//! coordinator, the job runner and the scheduler that drives it.

pub mod collaborators;
pub mod fingerprint;
pub mod ledger;
pub mod pipeline;
pub mod publication;
pub mod scheduler;

pub use collaborators::{
    CollaboratorError, GeneratedContent, Generator, PublishFailure, Publisher, ScrapedEntity,
    Scraper, SimulatedGenerator,
};
pub use fingerprint::FingerprintStore;
pub use ledger::{ArticleLedger, FailureDisposition};
pub use pipeline::{JobRunner, RunObserver, SilentObserver};
pub use publication::{PublicationCoordinator, PublishOutcome};
pub use scheduler::{Scheduler, TickReport, pause_job, resume_job, scheduler_status, upcoming_runs};

#[cfg(test)]
pub(crate) mod test_support {
    //! Temp-file storage and in-memory collaborators for unit tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use autopress_shared::{ContentFields, ContentPayload, FailureKind};
    use autopress_storage::Storage;
    use uuid::Uuid;

    use crate::collaborators::{
        CollaboratorError, GeneratedContent, Generator, PublishFailure, Publisher, ScrapedEntity,
        Scraper,
    };

    pub(crate) async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("ap_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test storage"))
    }

    pub(crate) fn payload(title: &str) -> ContentPayload {
        ContentPayload {
            title: title.to_string(),
            slug: title.to_lowercase().replace(' ', "-"),
            body: format!("<p>{title}</p>"),
            meta_description: title.to_string(),
            tags: vec!["test".into()],
            ..Default::default()
        }
    }

    pub(crate) fn entity(key: &str, name: &str, price: f64) -> ScrapedEntity {
        ScrapedEntity {
            identity_key: key.to_string(),
            content_fields: ContentFields {
                name: name.to_string(),
                price: Some(price),
                description: format!("{name} description"),
                brand: Some("Acme".into()),
                category: Some("Tools".into()),
                ..Default::default()
            },
        }
    }

    /// Scraper returning canned listings per category URL. Unknown URLs fail
    /// as unreachable.
    #[derive(Default)]
    pub(crate) struct FakeScraper {
        pages: Mutex<HashMap<String, Vec<ScrapedEntity>>>,
    }

    impl FakeScraper {
        pub(crate) fn with_page(self, url: &str, entities: Vec<ScrapedEntity>) -> Self {
            self.set_page(url, entities);
            self
        }

        pub(crate) fn set_page(&self, url: &str, entities: Vec<ScrapedEntity>) {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), entities);
        }
    }

    #[async_trait]
    impl Scraper for FakeScraper {
        async fn fetch(&self, url: &str) -> Result<Vec<ScrapedEntity>, CollaboratorError> {
            self.pages
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| CollaboratorError::new(FailureKind::SourceUnreachable, url))
        }
    }

    /// Generator that scores every payload the same and can be told to fail
    /// with a given kind.
    pub(crate) struct FakeGenerator {
        pub(crate) score: f64,
        pub(crate) fail_with: Mutex<Option<FailureKind>>,
        pub(crate) calls: Mutex<u32>,
    }

    impl FakeGenerator {
        pub(crate) fn new(score: f64) -> Self {
            Self {
                score,
                fail_with: Mutex::new(None),
                calls: Mutex::new(0),
            }
        }

        pub(crate) fn failing(kind: FailureKind) -> Self {
            let g = Self::new(90.0);
            *g.fail_with.lock().unwrap() = Some(kind);
            g
        }

        pub(crate) fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, fields: &ContentFields) -> Result<GeneratedContent, CollaboratorError> {
            *self.calls.lock().unwrap() += 1;
            if let Some(kind) = *self.fail_with.lock().unwrap() {
                return Err(CollaboratorError::new(kind, "generator failed"));
            }
            Ok(GeneratedContent {
                payload: payload(&fields.name),
                seo_score: self.score,
            })
        }
    }

    /// Publisher replaying a script of `create_post` results, then succeeding.
    #[derive(Default)]
    pub(crate) struct FakePublisher {
        script: Mutex<VecDeque<Result<String, PublishFailure>>>,
        delete_fails: Mutex<bool>,
        pub(crate) created: Mutex<Vec<String>>,
        pub(crate) deleted: Mutex<Vec<String>>,
        next_id: Mutex<u32>,
    }

    impl FakePublisher {
        pub(crate) fn scripted(results: Vec<Result<String, PublishFailure>>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                ..Default::default()
            }
        }

        pub(crate) fn failing_deletes(self) -> Self {
            *self.delete_fails.lock().unwrap() = true;
            self
        }

        pub(crate) fn create_calls(&self) -> usize {
            self.created.lock().unwrap().len()
        }

        pub(crate) fn delete_calls(&self) -> usize {
            self.deleted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn create_post(&self, payload: &ContentPayload) -> Result<String, PublishFailure> {
            self.created.lock().unwrap().push(payload.title.clone());
            if let Some(result) = self.script.lock().unwrap().pop_front() {
                return result;
            }
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            Ok(format!("{}", 1000 + *next))
        }

        async fn delete_post(&self, external_post_id: &str) -> Result<(), CollaboratorError> {
            self.deleted
                .lock()
                .unwrap()
                .push(external_post_id.to_string());
            if *self.delete_fails.lock().unwrap() {
                return Err(CollaboratorError::new(FailureKind::ServerError, "delete failed"));
            }
            Ok(())
        }
    }
}
