//! Content fingerprints: normalization, hashing, and the store facade the
//! pipeline uses to classify scraped entities.

use std::sync::Arc;

use autopress_shared::{
    ContentFields, Fingerprint, FingerprintAuditEntry, FingerprintStatus, ObservationResult,
    Result,
};
use autopress_storage::Storage;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

/// The hashed projection of [`ContentFields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFields {
    pub name: String,
    /// Price in hundredths, rounded half away from zero.
    pub price_cents: Option<i64>,
    pub description: String,
    pub brand: Option<String>,
    pub category: Option<String>,
}

/// Trim and collapse internal whitespace runs to a single space.
fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold(s: &str) -> Option<String> {
    let v = collapse(s).to_lowercase();
    (!v.is_empty()).then_some(v)
}

/// Project the allow-listed fields into their canonical form.
pub fn normalize(fields: &ContentFields) -> NormalizedFields {
    NormalizedFields {
        name: collapse(&fields.name),
        price_cents: fields
            .price
            .filter(|p| p.is_finite())
            .map(|p| (p * 100.0).round() as i64),
        description: collapse(&fields.description),
        brand: fields.brand.as_deref().and_then(fold),
        category: fields.category.as_deref().and_then(fold),
    }
}

fn put(hasher: &mut Sha256, label: &str, value: Option<&str>) {
    hasher.update((label.len() as u64).to_be_bytes());
    hasher.update(label.as_bytes());
    match value {
        None => hasher.update([0u8]),
        Some(v) => {
            hasher.update([1u8]);
            hasher.update((v.len() as u64).to_be_bytes());
            hasher.update(v.as_bytes());
        }
    }
}

/// SHA-256 (lowercase hex) over a length-prefixed encoding of the normalized
/// fields. Volatile attributes never reach the hash.
pub fn content_hash(fields: &ContentFields) -> String {
    let n = normalize(fields);
    let price = n.price_cents.map(|c| c.to_string());

    let mut hasher = Sha256::new();
    put(&mut hasher, "name", Some(&n.name));
    put(&mut hasher, "price", price.as_deref());
    put(&mut hasher, "description", Some(&n.description));
    put(&mut hasher, "brand", n.brand.as_deref());
    put(&mut hasher, "category", n.category.as_deref());
    format!("{:x}", hasher.finalize())
}

/// Whether an observation should lead to a new article: the entity is new or
/// changed, or its current content never made it into a submitted article.
pub fn needs_generation(obs: &ObservationResult) -> bool {
    match obs.status {
        FingerprintStatus::New | FingerprintStatus::Changed => true,
        FingerprintStatus::Unchanged => obs.generated_hash.as_deref() != Some(obs.new_hash.as_str()),
    }
}

/// Fingerprint operations over the shared store.
#[derive(Clone)]
pub struct FingerprintStore {
    storage: Arc<Storage>,
}

impl FingerprintStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Hash `fields` and record the observation.
    pub async fn observe(&self, identity_key: &str, fields: &ContentFields) -> Result<ObservationResult> {
        let hash = content_hash(fields);
        let obs = self
            .storage
            .observe_fingerprint(identity_key, &hash, Utc::now())
            .await?;
        debug!(identity_key, status = %obs.status, "observed entity");
        Ok(obs)
    }

    pub async fn get(&self, identity_key: &str) -> Result<Option<Fingerprint>> {
        self.storage.get_fingerprint(identity_key).await
    }

    pub async fn audit_trail(&self, identity_key: &str) -> Result<Vec<FingerprintAuditEntry>> {
        self.storage.fingerprint_audit(identity_key).await
    }

    /// Record that an article was submitted for `content_hash`.
    pub async fn mark_generated(&self, identity_key: &str, content_hash: &str) -> Result<()> {
        self.storage
            .mark_fingerprint_generated(identity_key, content_hash)
            .await
    }

    /// Remove fingerprints not seen since `older_than`.
    pub async fn purge(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.storage.purge_fingerprints(older_than).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_storage;

    fn fields(name: &str, price: f64) -> ContentFields {
        ContentFields {
            name: name.into(),
            price: Some(price),
            description: "Conical burrs, 40 settings".into(),
            brand: Some("Acme".into()),
            category: Some("Grinders".into()),
            ..Default::default()
        }
    }

    #[test]
    fn normalization_ignores_cosmetic_differences() {
        let a = fields("Espresso  Grinder", 199.999);
        let mut b = fields("  Espresso Grinder ", 200.0);
        b.brand = Some("ACME".into());
        b.category = Some(" grinders".into());
        b.attributes
            .insert("stock".into(), serde_json::json!(12));
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_changes_with_hashed_fields() {
        let base = fields("Grinder", 100.0);
        assert_ne!(content_hash(&base), content_hash(&fields("Grinder", 100.01)));
        assert_ne!(content_hash(&base), content_hash(&fields("Grinder Pro", 100.0)));

        let mut no_price = base.clone();
        no_price.price = None;
        assert_ne!(content_hash(&base), content_hash(&no_price));
    }

    #[test]
    fn length_prefix_prevents_field_bleed() {
        let mut a = fields("ab", 1.0);
        a.description = "c".into();
        let mut b = fields("a", 1.0);
        b.description = "bc".into();
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_is_stable() {
        let h = content_hash(&fields("Grinder", 100.0));
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash(&fields("Grinder", 100.0)));
    }

    #[test]
    fn generation_needed_when_submitted_hash_lags() {
        let mut obs = ObservationResult {
            identity_key: "k".into(),
            status: FingerprintStatus::Unchanged,
            previous_hash: Some("h".into()),
            new_hash: "h".into(),
            generated_hash: Some("h".into()),
        };
        assert!(!needs_generation(&obs));
        obs.generated_hash = None;
        assert!(needs_generation(&obs));
        obs.status = FingerprintStatus::Changed;
        obs.generated_hash = Some("h".into());
        assert!(needs_generation(&obs));
    }

    #[tokio::test]
    async fn observe_same_fields_twice_is_unchanged() {
        let store = FingerprintStore::new(test_storage().await);
        let f = fields("Grinder", 100.0);
        let first = store.observe("sku-1", &f).await.unwrap();
        assert_eq!(first.status, FingerprintStatus::New);

        let mut volatile = f.clone();
        volatile
            .attributes
            .insert("available".into(), serde_json::json!(false));
        let second = store.observe("sku-1", &volatile).await.unwrap();
        assert_eq!(second.status, FingerprintStatus::Unchanged);

        let third = store.observe("sku-1", &fields("Grinder", 90.0)).await.unwrap();
        assert_eq!(third.status, FingerprintStatus::Changed);
        assert_eq!(store.audit_trail("sku-1").await.unwrap().len(), 1);
    }
}
