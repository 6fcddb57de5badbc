use std::sync::Arc;
use std::sync::atomic::Ordering;

use tempfile::TempDir;

use kai_rewards::config::Config;
use kai_rewards::controller::{ClaimController, ClaimState, Notification};
use kai_rewards::fake::{FakeBackend, StatusReply};
use kai_rewards::metrics::MetricsCollector;
use kai_rewards::store::SessionStore;
use kai_rewards::tier::Tier;
use kai_rewards::transport::PollingTransport;
use kai_rewards::types::{ClaimRequest, StoredUser, UserDetails, UserId};

const USER: UserId = UserId(42);

fn setup(points: u64) -> (Arc<FakeBackend>, Arc<SessionStore>, ClaimController, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let user = StoredUser {
        user_id: USER,
        name: "Jane".into(),
        coins_earned: 0,
        customer_no: None,
        extra: Default::default(),
    };
    let config = Config { retry_delay_ms: 10, max_retries: 1, ..Config::default() };
    let backend = Arc::new(FakeBackend::new().with_account("jane", "pw", user.clone(), points));
    let store = Arc::new(SessionStore::open(dir.path().join("session.json")).unwrap());
    store.login(user).unwrap();

    let metrics = Arc::new(MetricsCollector::new());
    let transport = PollingTransport::new(backend.clone(), config.get_poll_interval(), 10, Arc::clone(&metrics));
    let controller = ClaimController::new(&config, backend.clone(), Arc::new(transport), Arc::clone(&store), metrics);
    (backend, store, controller, dir)
}

fn earn(backend: &FakeBackend, points: u64, coins: u64) {
    let mut details = backend.details_of(USER).unwrap();
    details.user_points = points;
    details.coins_earned = coins;
    backend.set_details(details);
}

async fn confirm(controller: &mut ClaimController, backend: &FakeBackend, pos_no: &str) -> Vec<Notification> {
    backend.script_status([StatusReply::Claimed { message: None, receipt: None }]);
    controller.submit(ClaimRequest::new("5", pos_no, USER)).await.unwrap();
    assert_eq!(controller.await_outcome().await, ClaimState::Confirmed);
    controller.drain_notifications()
}

fn tiers(notifications: &[Notification]) -> Vec<Tier> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::TierAchieved { tier, .. } => Some(*tier),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn crossing_silver_celebrates_once() {
    let (backend, store, mut controller, _dir) = setup(480);

    earn(&backend, 520, 52);
    let notifications = confirm(&mut controller, &backend, "INV-1").await;
    assert_eq!(tiers(&notifications), vec![Tier::Silver]);
    assert!(notifications.contains(&Notification::TierAchieved { tier: Tier::Silver, points: 520 }));
    assert_eq!(store.require_user().unwrap().coins_earned, 52);

    let updates = backend.congratulation_updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].is_congratulated_silver && !updates[0].is_congratulated_gold);
    assert_eq!(backend.details_of(USER).unwrap().congratulated_silver, Some(true));

    earn(&backend, 600, 60);
    assert!(tiers(&confirm(&mut controller, &backend, "INV-2").await).is_empty());
    assert_eq!(backend.congratulation_updates.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_backend_flags_do_not_refire() {
    let (backend, _store, mut controller, _dir) = setup(480);

    earn(&backend, 520, 0);
    assert_eq!(tiers(&confirm(&mut controller, &backend, "INV-1").await), vec![Tier::Silver]);

    backend.set_details(UserDetails { congratulated_silver: Some(false), ..backend.details_of(USER).unwrap() });
    assert!(tiers(&confirm(&mut controller, &backend, "INV-2").await).is_empty());
}

#[tokio::test(start_paused = true)]
async fn gold_marks_both_flags() {
    let (backend, _store, mut controller, _dir) = setup(1400);

    earn(&backend, 1550, 0);
    assert_eq!(tiers(&confirm(&mut controller, &backend, "INV-1").await), vec![Tier::Gold]);
    let details = backend.details_of(USER).unwrap();
    assert_eq!((details.congratulated_silver, details.congratulated_gold), (Some(true), Some(true)));
}

#[tokio::test(start_paused = true)]
async fn missing_backend_flags_do_not_celebrate() {
    let (backend, _store, mut controller, _dir) = setup(480);

    earn(&backend, 520, 0);
    backend.set_details(UserDetails { congratulated_silver: None, congratulated_gold: None, ..backend.details_of(USER).unwrap() });
    assert!(tiers(&confirm(&mut controller, &backend, "INV-1").await).is_empty());
    assert!(backend.congratulation_updates.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn refresh_failure_keeps_the_claim_confirmed() {
    let (backend, _store, mut controller, _dir) = setup(480);

    earn(&backend, 520, 0);
    backend.details_failures.store(10, Ordering::SeqCst);
    let notifications = confirm(&mut controller, &backend, "INV-1").await;
    assert!(tiers(&notifications).is_empty());
    assert_eq!(controller.state(), ClaimState::Confirmed);
    assert!(backend.congratulation_updates.lock().unwrap().is_empty());
}
