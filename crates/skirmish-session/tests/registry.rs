//! Integration tests for the session registry and reaper.
//!
//! Time-dependent tests run with `start_paused = true`; `GameClock` reads
//! Tokio's clock, so `tokio::time::advance` ages sessions deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use skirmish_clock::GameClock;
use skirmish_protocol::{EntityId, SessionId};
use skirmish_session::{
    Outbound, SessionConfig, SessionError, SessionLink, SessionReaper, SessionRegistry,
    SessionRequest,
};
use skirmish_transport::ConnectionId;
use tokio::sync::watch;

// ===========================================================================
// Helpers
// ===========================================================================

const TIMEOUT: Duration = Duration::from_secs(10);

fn config() -> SessionConfig {
    SessionConfig {
        session_timeout: TIMEOUT,
        sweep_interval: Duration::from_secs(1),
        ..SessionConfig::default()
    }
}

fn registry() -> SessionRegistry {
    SessionRegistry::new(config(), GameClock::default())
}

fn fresh() -> SessionRequest {
    SessionRequest::default()
}

fn resume(id: &SessionId) -> SessionRequest {
    SessionRequest {
        session_id: Some(id.clone()),
        secure: false,
    }
}

fn hero() -> EntityId {
    EntityId::new("hero")
}

// ===========================================================================
// get_or_create / get
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_get_or_create_new_session_issues_cookie() {
    let reg = registry();

    let lease = reg.get_or_create(&fresh(), hero).await;

    assert!(!lease.resumed);
    let cookie = lease.cookie.expect("new sessions get a cookie");
    assert_eq!(cookie.session_id(), lease.guard.id());
    assert_eq!(cookie.max_age(), TIMEOUT);
    assert_eq!(cookie.name(), "skirmish_session");
    assert_eq!(lease.guard.player(), &hero());
    assert_eq!(lease.guard.ref_count(), 1);
    assert_eq!(reg.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_or_create_secure_request_sets_secure_cookie() {
    let reg = registry();
    let request = SessionRequest {
        session_id: None,
        secure: true,
    };

    let lease = reg.get_or_create(&request, hero).await;

    let cookie = lease.cookie.unwrap();
    assert!(cookie.is_secure());
    assert!(cookie.header_value().contains("SameSite=Strict"));
}

#[tokio::test(start_paused = true)]
async fn test_get_or_create_known_id_resumes_without_spawning() {
    let reg = registry();
    let first = reg.get_or_create(&fresh(), hero).await;
    let id = first.guard.id().clone();
    drop(first);

    let spawned = AtomicUsize::new(0);
    let lease = reg
        .get_or_create(&resume(&id), || {
            spawned.fetch_add(1, Ordering::SeqCst);
            EntityId::new("someone-else")
        })
        .await;

    assert!(lease.resumed);
    assert!(lease.cookie.is_none());
    assert_eq!(lease.guard.id(), &id);
    assert_eq!(lease.guard.player(), &hero());
    assert_eq!(spawned.load(Ordering::SeqCst), 0);
    assert_eq!(reg.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_get_or_create_unknown_id_creates_new_session() {
    let reg = registry();
    let stale = SessionId::new("00000000000000000000000000000000");

    let lease = reg.get_or_create(&resume(&stale), hero).await;

    assert!(!lease.resumed);
    assert_ne!(lease.guard.id(), &stale);
    assert!(lease.cookie.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_get_unknown_returns_not_found() {
    let reg = registry();
    let result = reg.get(&SessionId::new("nope")).await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_guards_count_references() {
    let reg = registry();
    let lease = reg.get_or_create(&fresh(), hero).await;
    let id = lease.guard.id().clone();

    let second = reg.get(&id).await.unwrap();
    assert_eq!(second.ref_count(), 2);

    drop(lease);
    assert_eq!(second.ref_count(), 1);
    drop(second);

    let third = reg.get(&id).await.unwrap();
    assert_eq!(third.ref_count(), 1);
}

// ===========================================================================
// Sweep
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_sweep_keeps_idle_session_with_live_guard() {
    let reg = registry();
    let lease = reg.get_or_create(&fresh(), hero).await;
    let id = lease.guard.id().clone();

    tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
    assert!(reg.sweep().await.is_empty());
    assert!(reg.contains(&id).await);

    drop(lease);
    assert_eq!(reg.sweep().await, vec![id.clone()]);
    assert!(matches!(reg.get(&id).await, Err(SessionError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_keeps_recently_active_session() {
    let reg = registry();
    let id = reg.get_or_create(&fresh(), hero).await.guard.id().clone();

    tokio::time::advance(Duration::from_secs(6)).await;
    drop(reg.get(&id).await.unwrap());
    tokio::time::advance(Duration::from_secs(6)).await;

    assert!(reg.sweep().await.is_empty());
    assert!(reg.contains(&id).await);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_keeps_session_touched_by_its_connection() {
    let reg = registry();
    let lease = reg.get_or_create(&fresh(), hero).await;
    let session = Arc::clone(lease.guard.session());
    let id = session.id().clone();
    drop(lease);

    // Traffic that never names the session, like pings.
    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(4)).await;
        session.touch();
    }

    assert!(reg.sweep().await.is_empty());
    assert!(reg.contains(&id).await);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_at_exact_timeout_keeps_session() {
    let reg = registry();
    let id = reg.get_or_create(&fresh(), hero).await.guard.id().clone();

    tokio::time::advance(TIMEOUT).await;
    assert!(reg.sweep().await.is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(reg.sweep().await, vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_closes_attached_link() {
    let reg = registry();
    let lease = reg.get_or_create(&fresh(), hero).await;
    let (link, mut rx) = SessionLink::channel(ConnectionId::new(1), 4);
    reg.attach(&lease.guard, link);
    drop(lease);

    tokio::time::advance(TIMEOUT * 2).await;
    assert_eq!(reg.sweep().await.len(), 1);

    assert!(matches!(rx.recv().await, Some(Outbound::Close)));
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_evicts_only_expired_sessions() {
    let reg = registry();
    let old = reg.get_or_create(&fresh(), hero).await.guard.id().clone();
    tokio::time::advance(Duration::from_secs(8)).await;
    let young = reg.get_or_create(&fresh(), hero).await.guard.id().clone();
    tokio::time::advance(Duration::from_secs(3)).await;

    assert_eq!(reg.sweep().await, vec![old]);
    assert!(reg.contains(&young).await);
}

// ===========================================================================
// Links
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_attach_replaces_and_closes_previous_link() {
    let reg = registry();
    let lease = reg.get_or_create(&fresh(), hero).await;
    let (first, mut first_rx) = SessionLink::channel(ConnectionId::new(1), 4);
    let (second, _second_rx) = SessionLink::channel(ConnectionId::new(2), 4);

    reg.attach(&lease.guard, first);
    reg.attach(&lease.guard, second);

    assert_eq!(lease.guard.connection_id(), Some(ConnectionId::new(2)));
    assert!(matches!(first_rx.recv().await, Some(Outbound::Close)));
}

#[tokio::test(start_paused = true)]
async fn test_detach_ignores_stale_connection() {
    let reg = registry();
    let lease = reg.get_or_create(&fresh(), hero).await;
    let (link, _rx) = SessionLink::channel(ConnectionId::new(2), 4);
    reg.attach(&lease.guard, link);

    assert!(!reg.detach(&lease.guard, ConnectionId::new(1)));
    assert!(lease.guard.is_connected());
    assert!(reg.detach(&lease.guard, ConnectionId::new(2)));
    assert!(!lease.guard.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_connected_lists_only_linked_sessions() {
    let reg = registry();
    let linked = reg.get_or_create(&fresh(), hero).await;
    let _unlinked = reg.get_or_create(&fresh(), hero).await;
    let (link, _rx) = SessionLink::channel(ConnectionId::new(1), 4);
    reg.attach(&linked.guard, link);

    let connected = reg.connected().await;

    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].id(), linked.guard.id());
}

#[tokio::test(start_paused = true)]
async fn test_session_stays_registered_after_detach() {
    let reg = registry();
    let lease = reg.get_or_create(&fresh(), hero).await;
    let id = lease.guard.id().clone();
    let (link, _rx) = SessionLink::channel(ConnectionId::new(1), 4);
    reg.attach(&lease.guard, link);
    reg.detach(&lease.guard, ConnectionId::new(1));
    drop(lease);

    let resumed = reg.get_or_create(&resume(&id), hero).await;
    assert!(resumed.resumed);
}

// ===========================================================================
// Reaper
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_reaper_evicts_idle_session() {
    let reg = Arc::new(SessionRegistry::new(
        SessionConfig {
            session_timeout: Duration::from_secs(5),
            ..config()
        },
        GameClock::default(),
    ));
    let id = reg.get_or_create(&fresh(), hero).await.guard.id().clone();
    let reaper = SessionReaper::spawn(Arc::clone(&reg));

    tokio::time::sleep(Duration::from_secs(7)).await;

    assert!(!reg.contains(&id).await);
    reaper.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reaper_spares_session_in_use() {
    let reg = Arc::new(SessionRegistry::new(
        SessionConfig {
            session_timeout: Duration::from_secs(5),
            ..config()
        },
        GameClock::default(),
    ));
    let lease = reg.get_or_create(&fresh(), hero).await;
    let reaper = SessionReaper::spawn(Arc::clone(&reg));

    tokio::time::sleep(Duration::from_secs(20)).await;

    assert!(reg.contains(lease.guard.id()).await);
    reaper.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reaper_stops_on_shared_signal() {
    let reg = Arc::new(registry());
    let (tx, rx) = watch::channel(false);
    let task = SessionReaper::spawn_with(reg, rx);

    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("reaper should stop promptly")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reaper_stops_when_signal_sender_dropped() {
    let reg = Arc::new(registry());
    let (tx, rx) = watch::channel(false);
    let task = SessionReaper::spawn_with(reg, rx);

    drop(tx);

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("reaper should stop promptly")
        .unwrap();
}
