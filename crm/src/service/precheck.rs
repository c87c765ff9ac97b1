//! Pre-check lines, payments, receipts and the printable document.

use super::PipelineService;
use crate::error::{CrmError, Result};
use crate::integrations::{
    DocumentRenderer, ObjectStorage, PrecheckDocument, receipt_content_type, receipt_extension,
    receipt_key,
};
use crate::precheck::{
    Additional, AdditionalDraft, Concept, ConceptDraft, Payment, PaymentDraft, Precheck,
    PrecheckSummary, Receipt, compute_summary, ensure_can_read, ensure_items_editable,
    ensure_payments_editable, ensure_pending, items_open, payments_open,
};
use crate::types::{Actor, AdditionalId, ConceptId, Event, EventId, PaymentId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A pre-check as shown to a user
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PrecheckView {
    /// Lines and payments
    pub precheck: Precheck,
    /// Totals
    pub summary: PrecheckSummary,
    /// Download links of payment receipts
    pub receipt_urls: HashMap<PaymentId, String>,
    /// Whether concepts and additionals may change today
    pub items_editable: bool,
    /// Whether payments may be registered
    pub payments_editable: bool,
}

impl PipelineService {
    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Lines, payments, totals and receipt links of an event's pre-check.
    ///
    /// Receipt links that cannot be signed are left out.
    ///
    /// # Errors
    ///
    /// [`CrmError::NotFound`] or [`CrmError::Permission`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn get_precheck(&self, actor: &Actor, event_id: EventId) -> Result<PrecheckView> {
        let event = self.readable_precheck(actor, event_id).await?;
        let precheck = self.store.precheck(event_id).await?;
        let summary = compute_summary(&precheck, event.invoiced, self.config.pipeline.vat_rate);

        let mut receipt_urls = HashMap::new();
        if let Some(storage) = &self.storage {
            let ttl = Duration::from_secs(self.config.receipts.url_ttl_secs);
            for payment in &precheck.payments {
                let Some(receipt) = &payment.receipt else {
                    continue;
                };
                match storage
                    .signed_url(&self.config.receipts.bucket, &receipt.key, ttl)
                    .await
                {
                    Ok(url) => {
                        receipt_urls.insert(payment.id, url);
                    }
                    Err(error) => {
                        tracing::warn!(payment_id = %payment.id, error = %error, "Receipt link unavailable");
                    }
                }
            }
        }

        Ok(PrecheckView {
            items_editable: items_open(&event, self.today(), self.config.pipeline.precheck_grace_days),
            payments_editable: payments_open(&event),
            precheck,
            summary,
            receipt_urls,
        })
    }

    /// Financial totals of an event's pre-check.
    ///
    /// # Errors
    ///
    /// [`CrmError::NotFound`] or [`CrmError::Permission`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn get_precheck_summary(&self, actor: &Actor, event_id: EventId) -> Result<PrecheckSummary> {
        let event = self.readable_precheck(actor, event_id).await?;
        let precheck = self.store.precheck(event_id).await?;
        Ok(compute_summary(&precheck, event.invoiced, self.config.pipeline.vat_rate))
    }

    /// Render the pre-check document of an event.
    ///
    /// # Errors
    ///
    /// [`CrmError::Storage`] when no renderer is configured or rendering fails.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn render_precheck_document(&self, actor: &Actor, event_id: EventId) -> Result<Vec<u8>> {
        let renderer = self.renderer()?;
        let event = self.readable_precheck(actor, event_id).await?;
        let precheck = self.store.precheck(event_id).await?;
        let client = self.store.client(event.client_id).await?;
        let venue = match event.venue_id {
            Some(id) => self.store.venue(id).await?,
            None => None,
        };

        let document = PrecheckDocument {
            title: event.display_title(
                venue.as_ref().map(|v| v.name.as_str()),
                client.as_ref().map_or("", |c| c.name.as_str()),
            ),
            summary: compute_summary(&precheck, event.invoiced, self.config.pipeline.vat_rate),
            generated_at: self.clock.now(),
            event,
            client,
            venue,
            precheck,
        };
        renderer.render(&document).await
    }

    // ------------------------------------------------------------------
    // Concepts
    // ------------------------------------------------------------------

    /// Add a concept line.
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] / [`CrmError::Conflict`] when the pre-check is closed,
    /// [`CrmError::Validation`] for invalid lines.
    #[tracing::instrument(skip(self, draft), fields(actor = %actor.user_id))]
    pub async fn add_precheck_concept(
        &self,
        actor: &Actor,
        event_id: EventId,
        draft: ConceptDraft,
    ) -> Result<Concept> {
        self.items_gate(actor, event_id).await?;
        let concept = draft.into_concept(ConceptId::new(), event_id, self.clock.now())?;
        self.store.save_concept(&concept).await?;
        Ok(concept)
    }

    /// Replace a concept line.
    ///
    /// # Errors
    ///
    /// As [`Self::add_precheck_concept`], plus [`CrmError::NotFound`].
    #[tracing::instrument(skip(self, draft), fields(actor = %actor.user_id))]
    pub async fn update_precheck_concept(
        &self,
        actor: &Actor,
        event_id: EventId,
        id: ConceptId,
        draft: ConceptDraft,
    ) -> Result<Concept> {
        self.items_gate(actor, event_id).await?;
        let existing = self
            .store
            .precheck(event_id)
            .await?
            .concepts
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| CrmError::not_found("concept", id))?;

        let mut concept = draft.into_concept(id, event_id, self.clock.now())?;
        concept.created_at = existing.created_at;
        self.store.save_concept(&concept).await?;
        Ok(concept)
    }

    /// Remove a concept line.
    ///
    /// # Errors
    ///
    /// As [`Self::add_precheck_concept`], plus [`CrmError::NotFound`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn delete_precheck_concept(&self, actor: &Actor, event_id: EventId, id: ConceptId) -> Result<()> {
        self.items_gate(actor, event_id).await?;
        if self.store.delete_concept(event_id, id).await? {
            Ok(())
        } else {
            Err(CrmError::not_found("concept", id))
        }
    }

    // ------------------------------------------------------------------
    // Additionals
    // ------------------------------------------------------------------

    /// Add an additional line.
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] / [`CrmError::Conflict`] when the pre-check is closed,
    /// [`CrmError::Validation`] for invalid lines.
    #[tracing::instrument(skip(self, draft), fields(actor = %actor.user_id))]
    pub async fn add_precheck_additional(
        &self,
        actor: &Actor,
        event_id: EventId,
        draft: AdditionalDraft,
    ) -> Result<Additional> {
        self.items_gate(actor, event_id).await?;
        let additional = draft.into_additional(AdditionalId::new(), event_id, self.clock.now())?;
        self.store.save_additional(&additional).await?;
        Ok(additional)
    }

    /// Replace an additional line.
    ///
    /// # Errors
    ///
    /// As [`Self::add_precheck_additional`], plus [`CrmError::NotFound`].
    #[tracing::instrument(skip(self, draft), fields(actor = %actor.user_id))]
    pub async fn update_precheck_additional(
        &self,
        actor: &Actor,
        event_id: EventId,
        id: AdditionalId,
        draft: AdditionalDraft,
    ) -> Result<Additional> {
        self.items_gate(actor, event_id).await?;
        let existing = self
            .store
            .precheck(event_id)
            .await?
            .additionals
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| CrmError::not_found("additional", id))?;

        let mut additional = draft.into_additional(id, event_id, self.clock.now())?;
        additional.created_at = existing.created_at;
        self.store.save_additional(&additional).await?;
        Ok(additional)
    }

    /// Remove an additional line.
    ///
    /// # Errors
    ///
    /// As [`Self::add_precheck_additional`], plus [`CrmError::NotFound`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn delete_precheck_additional(
        &self,
        actor: &Actor,
        event_id: EventId,
        id: AdditionalId,
    ) -> Result<()> {
        self.items_gate(actor, event_id).await?;
        if self.store.delete_additional(event_id, id).await? {
            Ok(())
        } else {
            Err(CrmError::not_found("additional", id))
        }
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// Register a pending payment.
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] / [`CrmError::Conflict`] when payments are closed,
    /// [`CrmError::Validation`] for a non-positive amount.
    #[tracing::instrument(skip(self, draft), fields(actor = %actor.user_id))]
    pub async fn add_precheck_payment(
        &self,
        actor: &Actor,
        event_id: EventId,
        draft: PaymentDraft,
    ) -> Result<Payment> {
        self.payments_gate(actor, event_id).await?;
        let payment = draft.into_payment(PaymentId::new(), event_id, self.clock.now())?;
        self.store.save_payment(&payment).await?;
        tracing::info!(payment_id = %payment.id, event_id = %event_id, amount = %payment.amount, "Payment registered");
        Ok(payment)
    }

    /// Edit a payment still awaiting review.
    ///
    /// # Errors
    ///
    /// As [`Self::add_precheck_payment`], plus [`CrmError::NotFound`] and
    /// [`CrmError::Conflict`] for reviewed payments.
    #[tracing::instrument(skip(self, draft), fields(actor = %actor.user_id))]
    pub async fn update_precheck_payment(
        &self,
        actor: &Actor,
        event_id: EventId,
        id: PaymentId,
        draft: PaymentDraft,
    ) -> Result<Payment> {
        self.payments_gate(actor, event_id).await?;
        let mut payment = self.pending_payment(event_id, id).await?;
        draft.apply_to(&mut payment, self.clock.now())?;
        self.store.update_pending_payment(&payment).await?;
        Ok(payment)
    }

    /// Remove a payment still awaiting review, with its receipt.
    ///
    /// # Errors
    ///
    /// As [`Self::update_precheck_payment`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn delete_precheck_payment(&self, actor: &Actor, event_id: EventId, id: PaymentId) -> Result<()> {
        self.payments_gate(actor, event_id).await?;
        let payment = self.pending_payment(event_id, id).await?;
        if !self.store.delete_pending_payment(event_id, id).await? {
            return Err(CrmError::not_found("payment", id));
        }
        if let Some(receipt) = payment.receipt {
            self.discard_receipt(&receipt.key).await;
        }
        Ok(())
    }

    /// Upload the proof of a pending payment, replacing any previous file.
    ///
    /// # Errors
    ///
    /// As [`Self::update_precheck_payment`], plus [`CrmError::Validation`] for
    /// unsupported file types and [`CrmError::Storage`] when no storage is configured.
    #[tracing::instrument(skip(self, bytes), fields(actor = %actor.user_id, size = bytes.len()))]
    pub async fn attach_receipt(
        &self,
        actor: &Actor,
        event_id: EventId,
        id: PaymentId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Payment> {
        let storage = self.object_storage()?;
        self.payments_gate(actor, event_id).await?;
        let mut payment = self.pending_payment(event_id, id).await?;

        let extension = receipt_extension(filename)?;
        let key = receipt_key(event_id, id, &extension);
        storage
            .put(
                &self.config.receipts.bucket,
                &key,
                bytes,
                receipt_content_type(&extension),
            )
            .await?;

        let previous = payment.receipt.replace(Receipt {
            key: key.clone(),
            filename: filename.to_string(),
        });
        payment.updated_at = self.clock.now();
        if let Err(error) = self.store.update_pending_payment(&payment).await {
            self.discard_receipt(&key).await;
            return Err(error);
        }
        if let Some(previous) = previous {
            self.discard_receipt(&previous.key).await;
        }
        Ok(payment)
    }

    /// Remove the proof of a pending payment.
    ///
    /// # Errors
    ///
    /// As [`Self::update_precheck_payment`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn detach_receipt(&self, actor: &Actor, event_id: EventId, id: PaymentId) -> Result<Payment> {
        self.payments_gate(actor, event_id).await?;
        let mut payment = self.pending_payment(event_id, id).await?;
        let Some(receipt) = payment.receipt.take() else {
            return Ok(payment);
        };
        payment.updated_at = self.clock.now();
        self.store.update_pending_payment(&payment).await?;
        self.discard_receipt(&receipt.key).await;
        Ok(payment)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn readable_precheck(&self, actor: &Actor, event_id: EventId) -> Result<Event> {
        let event = self.load_event(event_id).await?;
        ensure_can_read(actor, &event)?;
        Ok(event)
    }

    async fn items_gate(&self, actor: &Actor, event_id: EventId) -> Result<Event> {
        let event = self.load_event(event_id).await?;
        ensure_items_editable(
            actor,
            &event,
            self.today(),
            self.config.pipeline.precheck_grace_days,
        )?;
        Ok(event)
    }

    async fn payments_gate(&self, actor: &Actor, event_id: EventId) -> Result<Event> {
        let event = self.load_event(event_id).await?;
        ensure_payments_editable(actor, &event)?;
        Ok(event)
    }

    async fn pending_payment(&self, event_id: EventId, id: PaymentId) -> Result<Payment> {
        let payment = self
            .store
            .payment(event_id, id)
            .await?
            .ok_or_else(|| CrmError::not_found("payment", id))?;
        ensure_pending(&payment)?;
        Ok(payment)
    }

    /// Best-effort removal of a stored receipt
    async fn discard_receipt(&self, key: &str) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(error) = storage.delete(&self.config.receipts.bucket, key).await {
            tracing::warn!(key = %key, error = %error, "Orphaned receipt left in storage");
        }
    }

    fn object_storage(&self) -> Result<Arc<dyn ObjectStorage>> {
        self.storage
            .clone()
            .ok_or_else(|| CrmError::Storage("no object storage configured".to_string()))
    }

    fn renderer(&self) -> Result<Arc<dyn DocumentRenderer>> {
        self.renderer
            .clone()
            .ok_or_else(|| CrmError::Storage("no document renderer configured".to_string()))
    }
}
