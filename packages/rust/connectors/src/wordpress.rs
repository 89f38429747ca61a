//! Publisher for the WordPress REST API (`/wp-json/wp/v2`).
//!
//! A post is created as a draft first. Categories and tags are then resolved
//! (created when missing) and the post is switched to `publish` in a second
//! request. A failure after the draft exists is reported with the draft's id
//! so the coordinator can delete it.

use async_trait::async_trait;
use autopress_core::{CollaboratorError, PublishFailure, Publisher};
use autopress_shared::{
    AppConfig, AutopressError, ContentPayload, FailureKind, Result, WordPressSection,
    wordpress_password,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use url::Url;

use crate::http::{build_client, status_error, transport_error};

#[derive(Debug, Deserialize)]
struct Created {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Term {
    id: u64,
    name: String,
}

/// Error body WordPress returns when a term already exists.
#[derive(Debug, Deserialize)]
struct TermExists {
    code: String,
    data: TermExistsData,
}

#[derive(Debug, Deserialize)]
struct TermExistsData {
    term_id: u64,
}

#[derive(Debug, Clone, Copy)]
enum Taxonomy {
    Categories,
    Tags,
}

impl Taxonomy {
    fn path(self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Tags => "tags",
        }
    }
}

/// [`Publisher`] for a WordPress site using application-password auth.
pub struct WordPressPublisher {
    client: Client,
    api: Url,
    username: String,
    password: String,
}

impl WordPressPublisher {
    pub fn new(config: &WordPressSection, user_agent: &str, password: String) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(AutopressError::config("wordpress.base_url is not set"));
        }
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| AutopressError::config(format!("invalid wordpress.base_url: {e}")))?;
        let api = base
            .join(&format!("{}/wp-json/wp/v2/", base.path().trim_end_matches('/')))
            .map_err(|e| AutopressError::config(format!("invalid wordpress.base_url: {e}")))?;
        Ok(Self {
            client: build_client(user_agent, config.timeout_secs)?,
            api,
            username: config.username.clone(),
            password,
        })
    }

    /// Build from the app config, reading the password from its env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            &config.wordpress,
            &config.feed.user_agent,
            wordpress_password(config)?,
        )
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, CollaboratorError> {
        self.api.join(path).map_err(|e| {
            CollaboratorError::new(
                FailureKind::ValidationRejected,
                format!("bad endpoint {path}: {e}"),
            )
        })
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> std::result::Result<T, CollaboratorError> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| transport_error(context, e))?;
        if !response.status().is_success() {
            return Err(status_error(context, response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| transport_error(context, e))
    }

    /// Find a term by exact (case-insensitive) name, creating it if missing.
    async fn ensure_term(&self, taxonomy: Taxonomy, name: &str) -> std::result::Result<u64, CollaboratorError> {
        let url = self.endpoint(taxonomy.path())?;
        let found: Vec<Term> = self
            .send_json(
                self.client
                    .get(url.clone())
                    .query(&[("search", name), ("per_page", "100")]),
                taxonomy.path(),
            )
            .await?;
        if let Some(term) = found.iter().find(|t| t.name.eq_ignore_ascii_case(name)) {
            return Ok(term.id);
        }

        let response = self
            .client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(|e| transport_error(taxonomy.path(), e))?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<TermExists>(&body) {
                Ok(exists) if exists.code == "term_exists" => Ok(exists.data.term_id),
                _ => Err(CollaboratorError::new(
                    FailureKind::ValidationRejected,
                    format!("{}: HTTP 400: {}", taxonomy.path(), body.chars().take(200).collect::<String>()),
                )),
            };
        }
        if !response.status().is_success() {
            return Err(status_error(taxonomy.path(), response).await);
        }
        let created: Created = response
            .json()
            .await
            .map_err(|e| transport_error(taxonomy.path(), e))?;
        debug!(taxonomy = taxonomy.path(), name, id = created.id, "term created");
        Ok(created.id)
    }

    /// Resolve taxonomy ids, then switch the draft to `publish`.
    async fn finish_post(&self, post_id: u64, payload: &ContentPayload) -> std::result::Result<(), CollaboratorError> {
        let mut categories = Vec::new();
        if let Some(category) = payload.category.as_deref().filter(|c| !c.trim().is_empty()) {
            categories.push(self.ensure_term(Taxonomy::Categories, category).await?);
        }
        let mut tags = Vec::with_capacity(payload.tags.len());
        for tag in payload.tags.iter().filter(|t| !t.trim().is_empty()) {
            tags.push(self.ensure_term(Taxonomy::Tags, tag).await?);
        }

        let mut body = json!({ "status": "publish", "tags": tags });
        if !categories.is_empty() {
            body["categories"] = json!(categories);
        }
        let url = self.endpoint(&format!("posts/{post_id}"))?;
        let _: Created = self
            .send_json(self.client.post(url).json(&body), "update post")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for WordPressPublisher {
    #[instrument(skip_all, fields(slug = %payload.slug))]
    async fn create_post(&self, payload: &ContentPayload) -> std::result::Result<String, PublishFailure> {
        let url = self.endpoint("posts")?;
        let draft = json!({
            "title": payload.title,
            "slug": payload.slug,
            "content": payload.body,
            "excerpt": payload.meta_description,
            "status": "draft",
        });
        let created: Created = self
            .send_json(self.client.post(url).json(&draft), "create post")
            .await?;
        let post_id = created.id.to_string();
        debug!(post_id = %post_id, "draft created");

        match self.finish_post(created.id, payload).await {
            Ok(()) => {
                info!(post_id = %post_id, "post published");
                Ok(post_id)
            }
            Err(e) => Err(PublishFailure::partial(post_id, e.to_string())),
        }
    }

    #[instrument(skip_all, fields(post_id = %external_post_id))]
    async fn delete_post(&self, external_post_id: &str) -> std::result::Result<(), CollaboratorError> {
        let url = self.endpoint(&format!("posts/{external_post_id}"))?;
        let response = self
            .client
            .delete(url)
            .query(&[("force", "true")])
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| transport_error("delete post", e))?;

        match response.status() {
            s if s.is_success() => {
                info!("post deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                debug!("post already gone");
                Ok(())
            }
            _ => Err(status_error("delete post", response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(server: &MockServer) -> WordPressPublisher {
        let config = WordPressSection {
            base_url: server.uri(),
            username: "editor".into(),
            ..Default::default()
        };
        WordPressPublisher::new(&config, "autopress-test", "secret".into()).expect("build publisher")
    }

    fn payload() -> ContentPayload {
        ContentPayload {
            title: "Grinder review".into(),
            slug: "grinder-review".into(),
            body: "<p>Good</p>".into(),
            meta_description: "A good grinder".into(),
            tags: vec!["coffee".into()],
            category: Some("Reviews".into()),
            ..Default::default()
        }
    }

    async fn mount_taxonomies(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/wp-json/wp/v2/categories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/categories"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "term_exists",
                "message": "A term with the name provided already exists.",
                "data": { "status": 400, "term_id": 7 }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wp-json/wp/v2/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "id": 3, "name": "Coffee" }])),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn creates_draft_then_publishes() {
        let server = MockServer::start().await;
        mount_taxonomies(&server).await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .and(body_partial_json(json!({ "status": "draft", "slug": "grinder-review" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 101 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts/101"))
            .and(body_partial_json(json!({ "status": "publish", "categories": [7], "tags": [3] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 101 })))
            .expect(1)
            .mount(&server)
            .await;

        let post_id = publisher(&server).create_post(&payload()).await.unwrap();
        assert_eq!(post_id, "101");
    }

    #[tokio::test]
    async fn rejected_credentials_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = publisher(&server).create_post(&payload()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::AuthRejected);
        assert!(err.created_post_id.is_none());
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = publisher(&server).create_post(&payload()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::RateLimited);
        assert!(err.kind.is_transient());
    }

    #[tokio::test]
    async fn failure_after_draft_reports_created_post() {
        let server = MockServer::start().await;
        mount_taxonomies(&server).await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 101 })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wp/v2/posts/101"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = publisher(&server).create_post(&payload()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::PostProcessing);
        assert_eq!(err.created_post_id.as_deref(), Some("101"));
    }

    #[tokio::test]
    async fn delete_forces_removal() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/wp-json/wp/v2/posts/101"))
            .and(query_param("force", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deleted": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/wp-json/wp/v2/posts/102"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let publisher = publisher(&server);
        publisher.delete_post("101").await.unwrap();
        let err = publisher.delete_post("102").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::ServerError);
    }

    #[test]
    fn missing_base_url_is_a_config_error() {
        let err = WordPressPublisher::new(&WordPressSection::default(), "ua", "pw".into());
        assert!(matches!(err, Err(AutopressError::Config { .. })));
    }
}
