/// Integration tests for the token record lifecycle and token primitives
///
/// Run with: cargo test --test lifecycle_tests

use chrono::{Duration, Utc};
use std::collections::HashSet;
use tokenward_core::auth::lifecycle::TokenLifecycle;
use tokenward_core::auth::policy::{TokenKind, TokenPolicy};
use tokenward_core::auth::token::{secure_compare, secure_compare_bytes, TokenGenerator};
use tokenward_core::clock::SimulatedClock;
use tokenward_core::models::account::Account;
use tokenward_core::models::token::NewToken;
use tokenward_core::store::memory::MemoryStorage;
use uuid::Uuid;

async fn setup() -> (TokenLifecycle<MemoryStorage, SimulatedClock>, MemoryStorage, SimulatedClock, Uuid) {
    let storage = MemoryStorage::new();
    let clock = SimulatedClock::from_recent();
    let now = Utc::now();
    let owner = Account {
        id: Uuid::new_v4(),
        email: "owner@example.com".to_string(),
        password_hash: "$argon2id$placeholder".to_string(),
        auth_token: None,
        auth_token_expires_at: None,
        activation_token: None,
        activation_token_expires_at: None,
        activated_at: Some(now),
        created_at: now,
        updated_at: now,
    };
    storage.insert_account(owner.clone()).await;

    let policy = TokenPolicy {
        session_token_ttl: Duration::hours(12),
        ..TokenPolicy::default()
    };
    let lifecycle = TokenLifecycle::with_clock(storage.clone(), policy, clock.clone());
    (lifecycle, storage, clock, owner.id)
}

fn session(resource_id: Uuid, realm: &str) -> NewToken {
    NewToken {
        resource_id,
        kind: TokenKind::Session,
        realm: realm.to_string(),
    }
}

#[tokio::test]
async fn test_issued_token_expires_after_policy_ttl() {
    let (lifecycle, _storage, clock, owner) = setup().await;
    let record = lifecycle.issue(session(owner, "web")).await.unwrap();

    assert!(!lifecycle.is_expired(&record));

    clock.advance(Duration::hours(12) + Duration::seconds(1));
    assert!(lifecycle.is_expired(&record));
}

#[tokio::test]
async fn test_full_lifecycle_is_persisted() {
    let (lifecycle, storage, clock, owner) = setup().await;
    let mut record = lifecycle.issue(session(owner, "web")).await.unwrap();

    clock.advance(Duration::hours(13));
    lifecycle.refresh_persisted(&mut record).await.unwrap();
    assert!(!lifecycle.is_expired(&record));

    let before_reset = record.clone();
    clock.advance(Duration::minutes(1));
    lifecycle.reset_persisted(&mut record).await.unwrap();
    assert_ne!(record.token, before_reset.token);
    assert_ne!(record.expires_at, before_reset.expires_at);

    assert!(lifecycle.confirm_persisted(&mut record).await.unwrap());
    assert!(lifecycle.expire_persisted(&mut record).await.unwrap());

    let stored = storage.token(record.id).await.unwrap();
    assert_eq!(stored, record);
    assert!(lifecycle.is_confirmed(&stored));
    assert!(lifecycle.is_expired(&stored));

    // the old value no longer resolves
    assert!(lifecycle
        .find(TokenKind::Session, &before_reset.token)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_realms_are_independent() {
    let (lifecycle, storage, _clock, owner) = setup().await;

    let web = lifecycle.issue(session(owner, "web")).await.unwrap();
    let mobile = lifecycle.issue(session(owner, "Mobile App")).await.unwrap();

    assert_eq!(mobile.realm, "mobile_app");
    assert_ne!(web.token, mobile.token);
    assert_eq!(storage.tokens_for(owner).await.len(), 2);
}

#[tokio::test]
async fn test_kind_names_parse_through_policy() {
    let (lifecycle, _storage, _clock, owner) = setup().await;

    let kind: TokenKind = " Password-Reset ".parse().unwrap();
    let record = lifecycle
        .issue(NewToken {
            resource_id: owner,
            kind,
            realm: "web".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(record.kind, TokenKind::PasswordReset);
    assert_eq!(lifecycle.policy().ttl_for_name("password_reset"), Duration::hours(1));

    let err = "magic_link".parse::<TokenKind>().unwrap_err();
    assert!(err.has_field("kind"));
}

#[test]
fn test_generated_tokens_are_distinct_and_unambiguous() {
    let generator = TokenGenerator::new();
    let tokens: HashSet<String> = (0..1000).map(|_| generator.generate()).collect();

    assert_eq!(tokens.len(), 1000);
    for token in &tokens {
        assert!(!token.contains(|c| matches!(c, '+' | '/' | '=' | 'l' | 'I' | 'O' | '0')));
    }
}

#[test]
fn test_secure_compare_properties() {
    let samples: [&[u8]; 4] = [b"a", b"T1", b"deadbeef", b"\x00\xff\x10"];

    for sample in samples {
        assert!(secure_compare_bytes(sample, sample));

        for i in 0..sample.len() {
            let mut flipped = sample.to_vec();
            flipped[i] ^= 0x01;
            assert!(!secure_compare_bytes(sample, &flipped));
        }

        let mut longer = sample.to_vec();
        longer.push(b'x');
        assert!(!secure_compare_bytes(sample, &longer));
    }

    assert!(!secure_compare("", ""));
    assert!(!secure_compare("abc", ""));
}
