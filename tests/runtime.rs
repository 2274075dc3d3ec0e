//! Tabs driven by the tokio runtime.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use idlesync::{
    ActivityEvent, ActivityKind, Clock, EngineConfig, IdleEvent, IdleState, ManualClock,
    MemoryStore, SharedStore, TabEngine, TabEvent, TabHandle, TabRuntime,
};

const START: u64 = 1_700_000_000_000;
const POLL: Duration = Duration::from_millis(5);

fn config() -> EngineConfig {
    EngineConfig {
        session_key: "portal".into(),
        timeout_ms: 30_000,
        prompt_lead_ms: 10_000,
        debounce_ms: 500,
        heartbeat_ms: 1_000,
        liveness_timeout_ms: 3_000,
        events: ActivityKind::defaults(),
    }
}

fn spawn(
    id: &str,
    store: &Arc<MemoryStore>,
    clock: &ManualClock,
) -> (TabHandle, mpsc::Sender<ActivityEvent>) {
    let engine =
        TabEngine::with_tab_id(id, config(), store.clone(), Arc::new(clock.clone())).unwrap();
    let (tx, rx) = mpsc::channel(16);
    (TabRuntime::spawn(engine, rx, POLL), tx)
}

/// Wait for the tab loop to catch up, giving up after two seconds.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn spawned_tab_leads_and_goes_idle() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(START);
    let (handle, _tx) = spawn("a", &store, &clock);
    let mut events = handle.subscribe();

    wait_until(|| handle.is_leader()).await;
    assert_eq!(handle.state(), IdleState::Active);

    clock.advance(31_000);
    wait_until(|| handle.is_idle()).await;
    assert_eq!(handle.remaining_time(), 0);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&TabEvent::Idle(IdleEvent::Prompted)));
    assert!(seen.contains(&TabEvent::Idle(IdleEvent::Idle)));

    handle.shutdown().await;
}

#[tokio::test]
async fn activity_channel_resets_the_countdown() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(START);
    let (handle, tx) = spawn("a", &store, &clock);
    wait_until(|| handle.is_leader()).await;

    clock.advance(35_000);
    wait_until(|| handle.is_idle()).await;

    assert_ok!(
        tx.send(ActivityEvent::new(ActivityKind::PointerDown, clock.now_ms()))
            .await
    );
    wait_until(|| handle.state() == IdleState::Active).await;
    assert_eq!(handle.remaining_time(), 30_000);
    assert_eq!(handle.snapshot().last_idle_duration_sec, 5);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_hands_leadership_to_the_next_tab() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(START);
    let (first, _first_tx) = spawn("a", &store, &clock);
    wait_until(|| first.is_leader()).await;

    let (second, _second_tx) = spawn("b", &store, &clock);
    // Let the second loop join while the first still leads.
    tokio::time::sleep(POLL * 4).await;
    assert!(!second.is_leader());
    assert_eq!(second.instance().tab_id, "b");

    first.shutdown().await;
    wait_until(|| second.is_leader()).await;

    let claim = assert_ok!(store.get("portal.leader.claim"));
    assert!(claim.is_some_and(|raw| raw.contains("\"tabId\":\"b\"")));

    second.shutdown().await;
    assert_eq!(assert_ok!(store.get("portal.leader.claim")), None);
}
