//! External collaborators: object storage, document rendering, and the labels used by
//! the inbound integrations.

use crate::error::{CrmError, Result};
use crate::precheck::{Precheck, PrecheckSummary};
use crate::types::{Client, Event, EventId, PaymentId, Venue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

// ============================================================================
// Object storage
// ============================================================================

/// Blob storage for payment receipts
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `key`
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Remove `key`; removing a missing key succeeds
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Time-limited download URL for `key`
    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String>;
}

/// [`ObjectStorage`] kept in memory, for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStorage {
    objects: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
}

impl InMemoryObjectStorage {
    /// Create an empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is stored in `bucket`
    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        if !self.contains(bucket, key).await {
            return Err(CrmError::not_found("receipt", key));
        }
        Ok(format!("memory://{bucket}/{key}?expires_in={}", ttl.as_secs()))
    }
}

/// Extensions accepted for receipts
pub const RECEIPT_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "pdf"];

/// Lower-cased extension of an uploaded receipt.
///
/// # Errors
///
/// Returns [`CrmError::Validation`] when the file has no extension or one outside
/// [`RECEIPT_EXTENSIONS`].
pub fn receipt_extension(filename: &str) -> Result<String> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| RECEIPT_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| {
            CrmError::validation(
                "receipt",
                format!("allowed file types: {}", RECEIPT_EXTENSIONS.join(", ")),
            )
        })?;
    Ok(extension)
}

/// `receipts/{event}/{payment}_{random}.{ext}`
#[must_use]
pub fn receipt_key(event_id: EventId, payment_id: PaymentId, extension: &str) -> String {
    format!(
        "receipts/{event_id}/{payment_id}_{}.{extension}",
        Uuid::new_v4().simple()
    )
}

/// MIME type for a receipt extension
#[must_use]
pub fn receipt_content_type(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Document rendering
// ============================================================================

/// Everything printed on a pre-check document
#[derive(Clone, Debug, Serialize)]
pub struct PrecheckDocument {
    /// Event
    pub event: Event,
    /// Display title
    pub title: String,
    /// Client
    pub client: Option<Client>,
    /// Venue
    pub venue: Option<Venue>,
    /// Lines and payments
    pub precheck: Precheck,
    /// Totals
    pub summary: PrecheckSummary,
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
}

/// Turns a pre-check snapshot into a printable file
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render `document`
    async fn render(&self, document: &PrecheckDocument) -> Result<Vec<u8>>;
}

/// Renders the snapshot as pretty-printed JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentRenderer;

#[async_trait]
impl DocumentRenderer for JsonDocumentRenderer {
    async fn render(&self, document: &PrecheckDocument) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(document).map_err(|e| CrmError::Storage(e.to_string()))
    }
}

// ============================================================================
// Inbound channel labels
// ============================================================================

/// Canonical slug for a channel label reported by an integration.
///
/// Known labels map to fixed slugs; anything else is lower-cased with spaces turned
/// into underscores. Missing or blank labels mean `web`.
#[must_use]
pub fn normalize_channel(label: Option<&str>) -> String {
    let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
        return "web".to_string();
    };
    match label {
        "Email directo" | "Direct email" => "direct_mail".to_string(),
        "Instagram" => "instagram".to_string(),
        "WhatsApp" => "whatsapp".to_string(),
        "Teléfono" | "Phone" => "phone".to_string(),
        "Referido" | "Referral" => "referral".to_string(),
        "Web" => "web".to_string(),
        other => other.to_lowercase().replace(' ', "_"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn receipt_extensions_are_checked_case_insensitively() {
        assert_eq!(receipt_extension("transfer.PDF").unwrap(), "pdf");
        assert_eq!(receipt_extension("photo.final.jpeg").unwrap(), "jpeg");
        assert!(receipt_extension("payload.exe").is_err());
        assert!(receipt_extension("no_extension").is_err());
    }

    #[test]
    fn receipt_keys_are_scoped_by_event_and_payment() {
        let event = EventId::new();
        let payment = PaymentId::new();
        let key = receipt_key(event, payment, "png");
        assert!(key.starts_with(&format!("receipts/{event}/{payment}_")));
        assert!(key.ends_with(".png"));
        assert_ne!(key, receipt_key(event, payment, "png"));
    }

    #[test]
    fn channels_normalize_to_slugs() {
        assert_eq!(normalize_channel(Some("WhatsApp")), "whatsapp");
        assert_eq!(normalize_channel(Some("Email directo")), "direct_mail");
        assert_eq!(normalize_channel(Some("Google Ads")), "google_ads");
        assert_eq!(normalize_channel(Some("  ")), "web");
        assert_eq!(normalize_channel(None), "web");
    }

    #[tokio::test]
    async fn memory_storage_signs_only_existing_objects() {
        let storage = InMemoryObjectStorage::new();
        storage.put("b", "k", vec![1, 2, 3], "image/png").await.unwrap();

        let url = storage.signed_url("b", "k", Duration::from_secs(1800)).await.unwrap();
        assert_eq!(url, "memory://b/k?expires_in=1800");

        storage.delete("b", "k").await.unwrap();
        assert!(storage.signed_url("b", "k", Duration::from_secs(1)).await.is_err());
    }
}
