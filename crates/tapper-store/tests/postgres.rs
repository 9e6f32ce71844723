//! PostgreSQL store integration tests.
//!
//! These tests require a reachable PostgreSQL database.
//! Run with: TAPPER_TEST_DATABASE_URL=postgres://... cargo test -p tapper-store --test postgres
//!
//! Without the variable every test is skipped.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use tapper_core::{
    default_catalog, Flag, GrantOutcome, PrizeExchange, RedeemOutcome, ReferralOutcome,
    RewardKind, TapPolicy, UserId, UserProfile,
};
use tapper_store::{PgStore, Store, StoreError};

const POLICY: TapPolicy = TapPolicy { cap: 10, points: 2 };

async fn connect() -> Option<Arc<PgStore>> {
    let Ok(url) = std::env::var("TAPPER_TEST_DATABASE_URL") else {
        println!("TAPPER_TEST_DATABASE_URL not set - skipping PostgreSQL tests");
        return None;
    };
    let store = PgStore::connect(&url).await.expect("connect to test database");
    store.migrate().await.expect("apply migrations");
    Some(Arc::new(store))
}

async fn create_user(store: &PgStore) -> UserId {
    let user_id = UserId::generate();
    store
        .upsert_user(&UserProfile::new(user_id.clone()))
        .await
        .unwrap();
    user_id
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 27).unwrap()
}

#[tokio::test]
async fn upsert_reports_creation_once() {
    let Some(store) = connect().await else {
        return;
    };
    let profile = UserProfile::new(UserId::generate());

    assert!(store.upsert_user(&profile).await.unwrap().created);
    assert!(!store.upsert_user(&profile).await.unwrap().created);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_taps_never_exceed_cap() {
    let Some(store) = connect().await else {
        return;
    };
    let user_id = create_user(&store).await;

    let tasks = (0..30).map(|_| {
        let store = Arc::clone(&store);
        let user_id = user_id.clone();
        tokio::spawn(async move { store.try_consume_tap(&user_id, day(), POLICY).await })
    });
    let applied = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| r.as_ref().unwrap().as_ref().unwrap().applied)
        .count();

    assert_eq!(applied, 10);
    assert_eq!(store.tap_count(&user_id, day()).await.unwrap(), 10);
    assert_eq!(store.get_user(&user_id).await.unwrap().unwrap().points, 20);
}

#[tokio::test]
async fn tap_for_unknown_user_is_not_found() {
    let Some(store) = connect().await else {
        return;
    };
    let result = store.try_consume_tap(&UserId::generate(), day(), POLICY).await;
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_grants_succeed_once() {
    let Some(store) = connect().await else {
        return;
    };
    let user_id = create_user(&store).await;

    let tasks = (0..16).map(|_| {
        let store = Arc::clone(&store);
        let user_id = user_id.clone();
        tokio::spawn(async move { store.grant_once(&user_id, &RewardKind::Keyword, 100).await })
    });
    let granted = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| r.as_ref().unwrap().as_ref().unwrap().is_granted())
        .count();

    assert_eq!(granted, 1);
    let user = store.get_user(&user_id).await.unwrap().unwrap();
    assert_eq!(user.points, 100);
    assert!(user.keyword_completed);
    assert_eq!(
        store.grant_once(&user_id, &RewardKind::Keyword, 100).await.unwrap(),
        GrantOutcome::AlreadyGranted
    );
}

#[tokio::test]
async fn referral_rules() {
    let Some(store) = connect().await else {
        return;
    };
    let a = create_user(&store).await;
    let b = create_user(&store).await;
    let c = create_user(&store).await;

    assert_eq!(
        store.record_referral(&a, &a, 100).await.unwrap(),
        ReferralOutcome::SelfReferral
    );
    assert_eq!(
        store.record_referral(&a, &b, 100).await.unwrap(),
        ReferralOutcome::Recorded { referrer_balance: 100 }
    );
    assert_eq!(
        store.record_referral(&c, &b, 100).await.unwrap(),
        ReferralOutcome::AlreadyReferred
    );
    assert_eq!(
        store.record_referral(&b, &a, 100).await.unwrap(),
        ReferralOutcome::Cycle
    );

    store.set_flag(&c, Flag::OnboardingCompleted, true).await.unwrap();
    assert_eq!(
        store.record_referral(&a, &c, 100).await.unwrap(),
        ReferralOutcome::WindowClosed
    );
    assert_eq!(store.count_referrals(&a).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_referrers_attribute_once() {
    let Some(store) = connect().await else {
        return;
    };
    let referred = create_user(&store).await;
    let mut referrers = Vec::new();
    for _ in 0..8 {
        referrers.push(create_user(&store).await);
    }

    let tasks = referrers.iter().cloned().map(|referrer| {
        let store = Arc::clone(&store);
        let referred = referred.clone();
        tokio::spawn(async move { store.record_referral(&referrer, &referred, 100).await })
    });
    let recorded = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| r.as_ref().unwrap().as_ref().unwrap().is_recorded())
        .count();
    assert_eq!(recorded, 1);

    let edge = store.get_referral(&referred).await.unwrap().unwrap();
    let mut total = 0;
    for referrer in &referrers {
        let points = store.get_user(referrer).await.unwrap().unwrap().points;
        assert_eq!(points, if *referrer == edge.referrer_id { 100 } else { 0 });
        total += points;
    }
    assert_eq!(total, 100);
}

#[tokio::test]
async fn debit_below_zero_is_rejected() {
    let Some(store) = connect().await else {
        return;
    };
    let user_id = create_user(&store).await;
    store.add_points(&user_id, 120).await.unwrap();

    let result = store.add_points(&user_id, -500).await;
    assert!(matches!(
        result,
        Err(StoreError::InsufficientPoints {
            balance: 120,
            required: 500
        })
    ));
    assert_eq!(store.get_user(&user_id).await.unwrap().unwrap().points, 120);

    let missing = store.add_points(&UserId::generate(), -1).await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));
}

#[tokio::test]
async fn redemption_is_idempotent_per_request() {
    let Some(store) = connect().await else {
        return;
    };
    let user_id = create_user(&store).await;
    store.add_points(&user_id, 650).await.unwrap();
    let prize = &default_catalog()[0];

    let exchange = PrizeExchange::new(user_id.clone(), "req-a".into(), prize);
    let first = store.redeem_prize(&exchange).await.unwrap();
    assert!(matches!(first, RedeemOutcome::Redeemed { balance: 50, .. }));

    let again = PrizeExchange::new(user_id.clone(), "req-a".into(), prize);
    let second = store.redeem_prize(&again).await.unwrap();
    assert!(matches!(second, RedeemOutcome::Replayed { balance: 50, .. }));

    let other = PrizeExchange::new(user_id.clone(), "req-b".into(), prize);
    let result = store.redeem_prize(&other).await;
    assert!(matches!(result, Err(StoreError::InsufficientPoints { balance: 50, .. })));
    assert_eq!(store.list_exchanges(&user_id).await.unwrap().len(), 1);
}
