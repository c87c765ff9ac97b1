//! Shared fixtures for the service integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use eventdesk_core::environment::Clock;
use eventdesk_crm::integrations::{InMemoryObjectStorage, JsonDocumentRenderer};
use eventdesk_crm::types::{ClientContact, User, UserId, Venue, VenueId};
use eventdesk_crm::{Actor, Config, CrmStore, EventDraft, InMemoryCrmStore, PipelineService, Role};
use eventdesk_testing::{FixedClock, test_clock};
use std::sync::Arc;

/// Service wired to in-memory collaborators, plus the people using it
pub struct Fixture {
    pub service: PipelineService,
    pub store: InMemoryCrmStore,
    pub storage: InMemoryObjectStorage,
    pub clock: Arc<FixedClock>,
    pub admin: Actor,
    pub seller: Actor,
    pub other_seller: Actor,
    pub treasury: Actor,
    pub venue: Venue,
}

pub async fn fixture() -> Fixture {
    fixture_with(Config::default()).await
}

pub async fn fixture_with(config: Config) -> Fixture {
    let store = InMemoryCrmStore::new();
    let admin = add_user(&store, "Admin", "admin@example.com", Role::Admin).await;
    let seller = add_user(&store, "Sofía", "sofia@example.com", Role::Salesperson).await;
    let other_seller = add_user(&store, "Bruno", "bruno@example.com", Role::Salesperson).await;
    let treasury = add_user(&store, "Tesorería", "treasury@example.com", Role::Treasury).await;

    let venue = Venue {
        id: VenueId::new(),
        name: "Costa".to_string(),
        colour: "#0088cc".to_string(),
        active: true,
    };
    store.save_venue(&venue).await.unwrap();

    let clock = Arc::new(test_clock());
    let storage = InMemoryObjectStorage::new();
    let service = PipelineService::new(
        Arc::new(store.clone()),
        Arc::clone(&clock) as Arc<dyn Clock>,
        config,
    )
    .await
    .unwrap()
    .with_object_storage(Arc::new(storage.clone()))
    .with_renderer(Arc::new(JsonDocumentRenderer));

    Fixture {
        service,
        store,
        storage,
        clock,
        admin,
        seller,
        other_seller,
        treasury,
        venue,
    }
}

pub async fn add_user(store: &InMemoryCrmStore, name: &str, email: &str, role: Role) -> Actor {
    let user = User {
        id: UserId::new(),
        name: name.to_string(),
        email: email.to_string(),
        role,
        active: true,
    };
    store.save_user(&user).await.unwrap();
    Actor::new(user.id, role)
}

/// Inquiry from `phone` with nothing but contact details
pub fn draft(phone: &str) -> EventDraft {
    EventDraft {
        client: ClientContact {
            phone: phone.to_string(),
            name: "Ana Pérez".to_string(),
            email: Some("ana@example.com".to_string()),
        },
        ..EventDraft::default()
    }
}
