//! Pre-check gates, receipts, payment review and treasury queues.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use chrono::{Duration, NaiveDate};
use common::{Fixture, draft, fixture};
use eventdesk_crm::precheck::{
    AdditionalDraft, ConceptDraft, PaymentDraft, PaymentMethod, PrecheckCategory, ReviewState,
};
use eventdesk_crm::service::PaymentValidation;
use eventdesk_crm::{CrmError, CrmStore, EventId, EventPatch, StateRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Approved event of the seller, dated `date`
async fn approved_event(f: &Fixture, phone: &str, date: NaiveDate) -> EventId {
    let mut request = draft(phone);
    request.salesperson_id = Some(f.seller.user_id);
    request.budget = Some(dec!(1000));
    request.event_date = Some(date);
    let id = f.service.create_event(&f.seller, request).await.unwrap().event.id;
    f.service
        .update_event(&f.seller, id, EventPatch::default(), Some(StateRequest::Approve))
        .await
        .unwrap();
    id
}

fn concept(description: &str) -> ConceptDraft {
    ConceptDraft {
        category: PrecheckCategory::Venue,
        category_other: None,
        description: description.to_string(),
        quantity: None,
        unit_price: dec!(100),
    }
}

fn payment(amount: Decimal) -> PaymentDraft {
    PaymentDraft {
        method: PaymentMethod::Cash,
        amount,
        payment_date: day(2025, 1, 1),
        deposit_date: None,
        clearing_date: None,
        notes: None,
    }
}

// ============================================================================
// Edit gates
// ============================================================================

#[tokio::test]
async fn quoted_events_have_no_precheck() {
    let f = fixture().await;
    let mut request = draft("+5491100000201");
    request.salesperson_id = Some(f.seller.user_id);
    request.budget = Some(dec!(10));
    let id = f.service.create_event(&f.seller, request).await.unwrap().event.id;

    let err = f.service.add_precheck_concept(&f.seller, id, concept("Hall")).await.unwrap_err();
    assert!(matches!(err, CrmError::Conflict(_)));
    let err = f.service.add_precheck_payment(&f.seller, id, payment(dec!(10))).await.unwrap_err();
    assert!(matches!(err, CrmError::Conflict(_)));
}

#[tokio::test]
async fn items_close_five_days_after_the_event_but_payments_stay_open() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000202", day(2025, 1, 2)).await;

    f.clock.advance(Duration::days(3));
    f.service.run_auto_conclude_sweep().await.unwrap();
    f.service.add_precheck_concept(&f.seller, id, concept("Within grace")).await.unwrap();

    f.clock.advance(Duration::days(4));
    let err = f.service.add_precheck_concept(&f.seller, id, concept("Too late")).await.unwrap_err();
    assert!(matches!(err, CrmError::Conflict(_)));
    let err = f.service.set_invoiced(&f.seller, id, true).await.unwrap_err();
    assert!(matches!(err, CrmError::Conflict(_)));

    f.service.add_precheck_payment(&f.seller, id, payment(dec!(10))).await.unwrap();
    let view = f.service.get_precheck(&f.seller, id).await.unwrap();
    assert!(!view.items_editable);
    assert!(view.payments_editable);
}

#[tokio::test]
async fn only_owners_and_admins_edit_while_treasury_reads() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000203", day(2025, 2, 1)).await;

    let err = f
        .service
        .add_precheck_concept(&f.other_seller, id, concept("Hall"))
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Permission(_)));
    let err = f
        .service
        .add_precheck_concept(&f.treasury, id, concept("Hall"))
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Permission(_)));
    let err = f.service.get_precheck(&f.other_seller, id).await.unwrap_err();
    assert!(matches!(err, CrmError::Permission(_)));

    f.service.add_precheck_concept(&f.admin, id, concept("Hall")).await.unwrap();
    let summary = f.service.get_precheck_summary(&f.treasury, id).await.unwrap();
    assert_eq!(summary.concepts_total, dec!(100));
    assert_eq!(summary.concept_count, 1);
}

#[tokio::test]
async fn lines_can_be_replaced_and_removed() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000204", day(2025, 2, 1)).await;

    let line = f.service.add_precheck_concept(&f.seller, id, concept("Hall")).await.unwrap();
    let replaced = f
        .service
        .update_precheck_concept(
            &f.seller,
            id,
            line.id,
            ConceptDraft {
                quantity: Some(dec!(3)),
                ..concept("Hall, full day")
            },
        )
        .await
        .unwrap();
    assert_eq!(replaced.subtotal(), dec!(300));
    assert_eq!(replaced.created_at, line.created_at);

    let discount = f
        .service
        .add_precheck_additional(
            &f.seller,
            id,
            AdditionalDraft {
                category: PrecheckCategory::Other,
                category_other: Some("Loyalty".to_string()),
                description: "Returning client".to_string(),
                amount: dec!(-50),
            },
        )
        .await
        .unwrap();

    let summary = f.service.get_precheck_summary(&f.seller, id).await.unwrap();
    assert_eq!(summary.subtotal, dec!(250));

    f.service.delete_precheck_additional(&f.seller, id, discount.id).await.unwrap();
    f.service.delete_precheck_concept(&f.seller, id, line.id).await.unwrap();
    let err = f.service.delete_precheck_concept(&f.seller, id, line.id).await.unwrap_err();
    assert!(matches!(err, CrmError::NotFound { .. }));
    assert!(!f.service.get_precheck_summary(&f.seller, id).await.unwrap().has_items);
}

// ============================================================================
// Payments and review
// ============================================================================

#[tokio::test]
async fn reviewed_payments_are_frozen() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000205", day(2025, 2, 1)).await;
    let registered = f.service.add_precheck_payment(&f.seller, id, payment(dec!(500))).await.unwrap();

    let err = f
        .service
        .validate_payment(
            &f.seller,
            id,
            registered.id,
            PaymentValidation {
                external_reference: "AS-1".to_string(),
                ..PaymentValidation::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Permission(_)));

    let validated = f
        .service
        .validate_payment(
            &f.treasury,
            id,
            registered.id,
            PaymentValidation {
                external_reference: "AS-1".to_string(),
                corrected_amount: Some(dec!(480)),
                change_note: Some("bank fee".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(validated.amount, dec!(480));
    assert_eq!(validated.original_amount, Some(dec!(500)));
    assert_eq!(validated.reviewed_by, Some(f.treasury.user_id));

    let err = f
        .service
        .update_precheck_payment(&f.seller, id, registered.id, payment(dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Conflict(_)));
    let err = f
        .service
        .delete_precheck_payment(&f.seller, id, registered.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Conflict(_)));
    let err = f
        .service
        .reject_payment(&f.treasury, id, registered.id, "duplicate".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Conflict(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_reviews_settle_on_one_outcome() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000210", day(2025, 2, 1)).await;
    let pending = f
        .service
        .add_precheck_payment(&f.seller, id, payment(dec!(500)))
        .await
        .unwrap();

    let validation = PaymentValidation {
        external_reference: "REF-1".to_string(),
        ..PaymentValidation::default()
    };
    let (validated, rejected, edited) = tokio::join!(
        f.service.validate_payment(&f.treasury, id, pending.id, validation),
        f.service
            .reject_payment(&f.treasury, id, pending.id, "duplicate".to_string()),
        f.service
            .update_precheck_payment(&f.seller, id, pending.id, payment(dec!(450))),
    );

    let reviews = [validated.is_ok(), rejected.is_ok()];
    assert_eq!(reviews.iter().filter(|ok| **ok).count(), 1);
    for err in [validated.err(), rejected.err()].into_iter().flatten() {
        assert!(matches!(err, CrmError::Conflict(_)));
    }

    let stored = f.store.payment(id, pending.id).await.unwrap().unwrap();
    match stored.review {
        ReviewState::Validated => {
            assert_eq!(stored.external_reference.as_deref(), Some("REF-1"));
            assert_eq!(stored.rejection_reason, None);
        }
        ReviewState::Rejected => {
            assert_eq!(stored.rejection_reason.as_deref(), Some("duplicate"));
            assert_eq!(stored.external_reference, None);
        }
        ReviewState::Pending => panic!("a review must win"),
    }
    if let Err(err) = edited {
        assert!(matches!(err, CrmError::Conflict(_)));
    }
}

#[tokio::test]
async fn corrections_need_a_note_and_nothing_is_saved_without_it() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000206", day(2025, 2, 1)).await;
    let registered = f.service.add_precheck_payment(&f.seller, id, payment(dec!(500))).await.unwrap();

    let err = f
        .service
        .validate_payment(
            &f.admin,
            id,
            registered.id,
            PaymentValidation {
                external_reference: "AS-2".to_string(),
                corrected_amount: Some(dec!(450)),
                change_note: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Validation { .. }));

    let stored = f.store.payment(id, registered.id).await.unwrap().unwrap();
    assert_eq!(stored.review, ReviewState::Pending);
    assert_eq!(stored.amount, dec!(500));
}

#[tokio::test]
async fn treasury_queue_orders_pending_by_payment_date() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000207", day(2025, 2, 1)).await;

    let late = f
        .service
        .add_precheck_payment(
            &f.seller,
            id,
            PaymentDraft {
                payment_date: day(2025, 1, 10),
                ..payment(dec!(100))
            },
        )
        .await
        .unwrap();
    let early = f
        .service
        .add_precheck_payment(
            &f.seller,
            id,
            PaymentDraft {
                payment_date: day(2024, 12, 20),
                ..payment(dec!(100))
            },
        )
        .await
        .unwrap();
    let refused = f.service.add_precheck_payment(&f.seller, id, payment(dec!(70))).await.unwrap();
    f.service
        .reject_payment(&f.treasury, id, refused.id, "not received".to_string())
        .await
        .unwrap();

    let queue = f.service.treasury_queue(&f.treasury).await.unwrap();
    assert_eq!(queue.pending.len(), 2);
    assert_eq!(queue.pending[0].payment.id, early.id);
    assert_eq!(queue.pending[1].payment.id, late.id);
    assert_eq!(queue.rejected.len(), 1);
    assert!(queue.validated.is_empty());

    f.clock.advance(Duration::days(31));
    assert!(f.service.treasury_queue(&f.admin).await.unwrap().rejected.is_empty());

    let err = f.service.treasury_queue(&f.seller).await.unwrap_err();
    assert!(matches!(err, CrmError::Permission(_)));
}

// ============================================================================
// Receipts and documents
// ============================================================================

#[tokio::test]
async fn receipts_are_replaced_and_signed() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000208", day(2025, 2, 1)).await;
    let registered = f.service.add_precheck_payment(&f.seller, id, payment(dec!(300))).await.unwrap();
    let bucket = f.service.config().receipts.bucket.clone();

    let err = f
        .service
        .attach_receipt(&f.seller, id, registered.id, "transfer.exe", vec![0])
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Validation { .. }));

    let first = f
        .service
        .attach_receipt(&f.seller, id, registered.id, "transfer.PNG", vec![1, 2])
        .await
        .unwrap();
    let first_key = first.receipt.clone().unwrap().key;
    assert!(f.storage.contains(&bucket, &first_key).await);

    let second = f
        .service
        .attach_receipt(&f.seller, id, registered.id, "transfer.pdf", vec![3])
        .await
        .unwrap();
    let second_key = second.receipt.clone().unwrap().key;
    assert!(!f.storage.contains(&bucket, &first_key).await);
    assert!(second_key.ends_with(".pdf"));

    let view = f.service.get_precheck(&f.treasury, id).await.unwrap();
    let url = view.receipt_urls.get(&registered.id).unwrap();
    assert!(url.contains(&second_key));
    assert!(url.ends_with("expires_in=1800"));

    let detached = f.service.detach_receipt(&f.seller, id, registered.id).await.unwrap();
    assert!(detached.receipt.is_none());
    assert!(!f.storage.contains(&bucket, &second_key).await);
}

#[tokio::test]
async fn precheck_document_snapshots_event_and_totals() {
    let f = fixture().await;
    let id = approved_event(&f, "+5491100000209", day(2025, 2, 1)).await;
    f.service.add_precheck_concept(&f.seller, id, concept("Hall")).await.unwrap();

    let bytes = f.service.render_precheck_document(&f.seller, id).await.unwrap();
    let document: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(document["event"]["id"], serde_json::json!(id.to_string()));
    assert_eq!(document["summary"]["concept_count"], serde_json::json!(1));
    assert_eq!(document["client"]["name"], serde_json::json!("Ana Pérez"));
}
