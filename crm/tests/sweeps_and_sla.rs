//! SLA feed, violation sweep and auto-conclude sweep.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chrono::{Duration, NaiveDate};
use common::{draft, fixture};
use eventdesk_core::environment::Clock;
use eventdesk_crm::service::ViolationQuery;
use eventdesk_crm::sla::SlaStatus;
use eventdesk_crm::types::TransitionOrigin;
use eventdesk_crm::{CrmError, CrmStore, EventPatch, EventState, StateRequest};
use rust_decimal_macros::dec;

#[tokio::test]
async fn sla_sweep_records_each_breach_once() {
    let f = fixture().await;
    let unowned = f.service.ingest_event(draft("+5491100000101")).await.unwrap().event;
    let mut owned = draft("+5491100000102");
    owned.salesperson_id = Some(f.seller.user_id);
    let owned = f.service.create_event(&f.seller, owned).await.unwrap().event;

    f.clock.advance(Duration::hours(49));

    let first = f.service.run_sla_sweep().await.unwrap();
    assert_eq!(first.examined, 2);
    assert_eq!(first.changed, 2);
    assert_eq!(first.failed, 0);

    let second = f.service.run_sla_sweep().await.unwrap();
    assert_eq!(second.changed, 0);

    let violations = f
        .service
        .list_violations(&f.admin, ViolationQuery::default())
        .await
        .unwrap();
    assert_eq!(violations.len(), 2);

    let owned_row = violations.iter().find(|v| v.event_id == owned.id).unwrap();
    assert_eq!(owned_row.state, EventState::Assigned);
    assert_eq!(owned_row.salesperson.as_ref().unwrap().name, "Sofía");
    assert_eq!(owned_row.elapsed_secs, 49 * 3600);

    let unowned_row = violations.iter().find(|v| v.event_id == unowned.id).unwrap();
    assert!(unowned_row.salesperson.is_none());
}

#[tokio::test]
async fn a_new_state_can_breach_again() {
    let f = fixture().await;
    let id = f.service.ingest_event(draft("+5491100000103")).await.unwrap().event.id;

    f.clock.advance(Duration::hours(50));
    f.service.run_sla_sweep().await.unwrap();
    f.service.assign_salesperson(&f.admin, id, f.seller.user_id).await.unwrap();
    f.clock.advance(Duration::hours(50));
    let report = f.service.run_sla_sweep().await.unwrap();

    assert_eq!(report.changed, 1);
    let violations = f
        .service
        .list_violations(&f.admin, ViolationQuery::default())
        .await
        .unwrap();
    assert_eq!(violations.len(), 2);
    assert_eq!(violations[0].state, EventState::Assigned);
}

#[tokio::test]
async fn violation_history_is_admin_only_and_filtered() {
    let f = fixture().await;
    let mut owned = draft("+5491100000104");
    owned.salesperson_id = Some(f.seller.user_id);
    f.service.create_event(&f.seller, owned).await.unwrap();
    f.clock.advance(Duration::hours(49));
    f.service.run_sla_sweep().await.unwrap();

    let err = f
        .service
        .list_violations(&f.seller, ViolationQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Permission(_)));

    let theirs = f
        .service
        .list_violations(
            &f.admin,
            ViolationQuery {
                salesperson: Some(f.other_seller.user_id),
                ..ViolationQuery::default()
            },
        )
        .await
        .unwrap();
    assert!(theirs.is_empty());

    let breach_day = f.clock.today();
    let on_day = f
        .service
        .list_violations(
            &f.admin,
            ViolationQuery {
                from: Some(breach_day),
                to: Some(breach_day),
                salesperson: Some(f.seller.user_id),
            },
        )
        .await
        .unwrap();
    assert_eq!(on_day.len(), 1);
}

#[tokio::test]
async fn alert_feed_puts_critical_first_and_respects_visibility() {
    let f = fixture().await;
    let oldest = f.service.ingest_event(draft("+5491100000105")).await.unwrap().event;
    f.clock.advance(Duration::hours(25));
    let mut mine = draft("+5491100000106");
    mine.salesperson_id = Some(f.seller.user_id);
    let mine = f.service.create_event(&f.seller, mine).await.unwrap().event;
    let mut theirs = draft("+5491100000107");
    theirs.salesperson_id = Some(f.other_seller.user_id);
    f.service.create_event(&f.other_seller, theirs).await.unwrap();
    f.clock.advance(Duration::hours(25));

    let feed = f.service.get_sla_alerts(&f.seller).await.unwrap();

    assert_eq!(feed.alerts.len(), 2);
    assert_eq!(feed.critical_count, 1);
    assert_eq!(feed.alert_count, 1);
    assert_eq!(feed.alerts[0].event_id, oldest.id);
    assert_eq!(feed.alerts[0].status, SlaStatus::Critical);
    assert_eq!(feed.alerts[1].event_id, mine.id);
    assert_eq!(feed.alerts[1].elapsed_label, "1d 1h");

    let admin_feed = f.service.get_sla_alerts(&f.admin).await.unwrap();
    assert_eq!(admin_feed.alerts.len(), 3);
}

#[tokio::test]
async fn auto_conclude_closes_past_approved_events_once() {
    let f = fixture().await;
    let mut request = draft("+5491100000108");
    request.salesperson_id = Some(f.seller.user_id);
    request.budget = Some(dec!(1200));
    request.event_date = NaiveDate::from_ymd_opt(2025, 1, 3);
    let id = f.service.create_event(&f.seller, request).await.unwrap().event.id;
    f.service
        .update_event(&f.seller, id, EventPatch::default(), Some(StateRequest::Approve))
        .await
        .unwrap();

    let early = f.service.run_auto_conclude_sweep().await.unwrap();
    assert_eq!(early.examined, 1);
    assert_eq!(early.changed, 0);

    f.clock.advance(Duration::days(3));
    let report = f.service.run_auto_conclude_sweep().await.unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(f.service.run_auto_conclude_sweep().await.unwrap().examined, 0);

    let event = f.store.event(id).await.unwrap().unwrap();
    assert_eq!(event.state, EventState::Concluded);
    let rows = f.store.transitions_for(id).await.unwrap();
    let last = rows.last().unwrap();
    assert_eq!(last.origin, TransitionOrigin::System);
    assert_eq!(last.actor, None);
}
