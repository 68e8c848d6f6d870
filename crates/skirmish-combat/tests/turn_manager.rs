//! Integration tests for the turn manager: ordering, ownership, the turn
//! timer and delayed actions.
//!
//! Timer tests run with paused time; awaiting the notice channel lets Tokio
//! jump straight to the next timer.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{eid, eids};
use skirmish_clock::{ClockConfig, GameClock};
use skirmish_combat::{
    ActionRequest, CombatGroups, Removal, TurnConfig, TurnError, TurnManager, TurnNotice,
    TurnNotices, TurnUpdate, ValidationError,
};
use skirmish_protocol::{EntityId, Position};
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(30);

fn manager() -> (TurnManager, TurnNotices) {
    TurnManager::new(
        TurnConfig {
            turn_timeout: TIMEOUT,
            reorder_on_timeout: true,
        },
        GameClock::new(ClockConfig::with_rate(10)),
    )
}

fn fireball(delay_ticks: u64) -> ActionRequest {
    ActionRequest {
        action_type: "fireball".into(),
        target_position: Some(Position::new(3, 4)),
        parameters: BTreeMap::new(),
        delay_ticks,
    }
}

async fn current_count(tm: &TurnManager, all: &[EntityId]) -> usize {
    let mut n = 0;
    for id in all {
        if tm.is_current_turn(id).await {
            n += 1;
        }
    }
    n
}

// ===========================================================================
// Ordering and rounds
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_exactly_one_current_actor_through_many_advances() {
    let (tm, _rx) = manager();
    let all = eids(&["a", "b", "c", "d"]);
    tm.start_combat(all.clone()).await.unwrap();

    for _ in 0..13 {
        assert_eq!(current_count(&tm, &all).await, 1);
        tm.advance_turn().await.unwrap();
    }
    assert_eq!(current_count(&tm, &all).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_round_increments_only_on_wrap() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();

    let mut wraps = 0;
    for _ in 0..7 {
        if tm.advance_turn().await.unwrap().wrapped {
            wraps += 1;
        }
    }

    assert_eq!(wraps, 2);
    assert_eq!(tm.round().await, 3);
    assert_eq!(tm.current_actor().await, Some(eid("b")));
}

#[tokio::test(start_paused = true)]
async fn test_no_current_actor_after_end_combat() {
    let (tm, _rx) = manager();
    let all = eids(&["a", "b"]);
    tm.start_combat(all.clone()).await.unwrap();
    tm.end_combat().await;

    assert_eq!(current_count(&tm, &all).await, 0);
    assert_eq!(tm.round().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_end_combat_is_idempotent() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    tm.advance_turn().await;
    tm.advance_turn().await;

    assert_eq!(tm.end_combat().await, Some(2));
    assert_eq!(tm.end_combat().await, None);
    assert_eq!(tm.end_combat().await, None);
    assert!(!tm.in_combat().await);

    // A new combat can start afterwards.
    tm.start_combat(eids(&["x"])).await.unwrap();
    assert_eq!(tm.round().await, 1);
}

// ===========================================================================
// Ownership
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_end_turn_for_wrong_actor_is_rejected() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();

    assert_eq!(tm.end_turn_for(&eid("b")).await, Err(TurnError::NotActorsTurn));
    assert_eq!(tm.current_actor().await, Some(eid("a")));
}

#[tokio::test(start_paused = true)]
async fn test_actor_operations_when_idle_return_not_in_combat() {
    let (tm, _rx) = manager();
    assert_eq!(tm.end_turn_for(&eid("a")).await, Err(TurnError::NotInCombat));
    assert_eq!(
        tm.queue_action(&eid("a"), fireball(0)).await,
        Err(TurnError::NotInCombat)
    );
}

#[tokio::test(start_paused = true)]
async fn test_queue_action_by_other_actor_is_rejected() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();

    let result = tm.queue_action(&eid("b"), fireball(0)).await;

    assert_eq!(result, Err(TurnError::NotActorsTurn));
    assert_eq!(tm.snapshot().await.pending_actions, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_end_turn_for_same_actor_advances_once() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let tm = tm.clone();
            tokio::spawn(async move { tm.end_turn_for(&eid("a")).await })
        })
        .collect();

    let mut ok = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            ok += 1;
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(tm.current_actor().await, Some(eid("b")));
    tm.end_combat().await;
}

// ===========================================================================
// Turn timer
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_advances_turn_and_publishes_notice() {
    let (tm, mut rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    tm.act_as(&eid("a"), |_| ()).await.unwrap();
    let started = Instant::now();

    let notice = rx.recv().await.unwrap();

    assert_eq!(started.elapsed(), TIMEOUT);
    let TurnNotice::TimedOut {
        actor,
        reordered,
        advance,
        ..
    } = notice;
    assert_eq!(actor, eid("a"));
    assert!(!reordered);
    assert_eq!(advance.next, eid("b"));
    assert_eq!(tm.current_actor().await, Some(eid("b")));
}

#[tokio::test(start_paused = true)]
async fn test_timer_rearms_after_timeout() {
    let (tm, mut rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    tm.act_as(&eid("a"), |_| ()).await.unwrap();
    let started = Instant::now();

    rx.recv().await.unwrap();
    let TurnNotice::TimedOut { actor, advance, .. } = rx.recv().await.unwrap();

    assert_eq!(started.elapsed(), TIMEOUT * 2);
    assert_eq!(actor, eid("b"));
    assert!(advance.wrapped);
    assert_eq!(tm.round().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_end_turn_restarts_timer() {
    let (tm, mut rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    let started = Instant::now();

    tokio::time::sleep(Duration::from_secs(20)).await;
    tm.end_turn_for(&eid("a")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(rx.try_recv().is_err(), "the first turn's timer must not fire");

    let TurnNotice::TimedOut { actor, .. } = rx.recv().await.unwrap();
    assert_eq!(actor, eid("b"));
    assert_eq!(started.elapsed(), Duration::from_secs(50));
}

#[tokio::test(start_paused = true)]
async fn test_end_combat_stops_timer() {
    let (tm, mut rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    tm.end_combat().await;

    tokio::time::sleep(TIMEOUT * 3).await;

    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_apply_turn_timeout_rearms_with_new_duration() {
    let (tm, mut rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    let started = Instant::now();

    tm.apply(TurnUpdate::TurnTimeout(Duration::from_secs(5)))
        .await
        .unwrap();
    rx.recv().await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(5));
}

// ===========================================================================
// Timeout reordering
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_without_action_moves_group_to_front() {
    let (tm, mut rx) = manager();
    tm.start_combat(eids(&["a", "b", "c", "d"])).await.unwrap();
    tm.set_combat_groups(CombatGroups::from([(eid("a"), eids(&["a", "c"]))]))
        .await
        .unwrap();

    let TurnNotice::TimedOut {
        reordered, advance, ..
    } = rx.recv().await.unwrap();

    assert!(reordered);
    assert_eq!(advance.next, eid("b"));
    assert!(!advance.wrapped);
    let snap = tm.snapshot().await;
    assert_eq!(snap.initiative, eids(&["a", "c", "b", "d"]));
    assert_eq!(snap.current, Some(eid("b")));
    assert_eq!(snap.round, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_after_queueing_keeps_order() {
    let (tm, mut rx) = manager();
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();
    tm.advance_turn().await.unwrap();
    tm.queue_action(&eid("b"), fireball(1_000)).await.unwrap();

    let TurnNotice::TimedOut { reordered, .. } = rx.recv().await.unwrap();

    assert!(!reordered);
    assert_eq!(tm.snapshot().await.initiative, eids(&["a", "b", "c"]));
    assert_eq!(tm.current_actor().await, Some(eid("c")));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reorder_disabled_by_config() {
    let (tm, mut rx) = TurnManager::new(
        TurnConfig {
            turn_timeout: TIMEOUT,
            reorder_on_timeout: false,
        },
        GameClock::default(),
    );
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();
    tm.advance_turn().await.unwrap();

    let TurnNotice::TimedOut { reordered, .. } = rx.recv().await.unwrap();

    assert!(!reordered);
    assert_eq!(tm.snapshot().await.initiative, eids(&["a", "b", "c"]));
}

// ===========================================================================
// Delayed actions
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_delayed_action_becomes_due_after_its_ticks() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    let trigger = tm.queue_action(&eid("a"), fireball(5)).await.unwrap();
    assert_eq!(trigger.tick, 5);

    tokio::time::advance(Duration::from_millis(400)).await;
    assert!(tm.take_due_actions().await.is_empty());

    tokio::time::advance(Duration::from_millis(100)).await;
    let due = tm.take_due_actions().await;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].actor, eid("a"));
    assert_eq!(due[0].target_position, Some(Position::new(3, 4)));

    assert!(tm.take_due_actions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_due_actions_of_departed_actor_are_discarded() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();
    tm.queue_action(&eid("a"), fireball(0)).await.unwrap();
    tm.remove_combatant(&eid("a")).await;

    assert!(tm.take_due_actions().await.is_empty());
    assert_eq!(tm.snapshot().await.pending_actions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_notice_carries_due_actions() {
    let (tm, mut rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    tm.queue_action(&eid("a"), fireball(0)).await.unwrap();

    let TurnNotice::TimedOut { due, .. } = rx.recv().await.unwrap();

    assert_eq!(due.len(), 1);
    assert_eq!(due[0].action_type, "fireball");
}

// ===========================================================================
// Membership
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_remove_earlier_combatant_keeps_current_actor() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();
    tm.advance_turn().await.unwrap();

    assert_eq!(tm.remove_combatant(&eid("a")).await, Removal::Removed);

    let snap = tm.snapshot().await;
    assert_eq!(snap.current, Some(eid("b")));
    assert_eq!(snap.current_index, 0);
}

#[tokio::test(start_paused = true)]
async fn test_remove_current_combatant_passes_turn() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();
    tm.advance_turn().await.unwrap();

    let Removal::RemovedCurrent(advance) = tm.remove_combatant(&eid("b")).await else {
        panic!("expected RemovedCurrent");
    };
    assert_eq!(advance.previous, eid("b"));
    assert_eq!(advance.next, eid("c"));
    assert!(!advance.wrapped);
}

#[tokio::test(start_paused = true)]
async fn test_remove_last_in_order_while_current_wraps() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();
    tm.advance_turn().await.unwrap();

    let Removal::RemovedCurrent(advance) = tm.remove_combatant(&eid("b")).await else {
        panic!("expected RemovedCurrent");
    };
    assert!(advance.wrapped);
    assert_eq!(advance.next, eid("a"));
    assert_eq!(tm.round().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_remove_only_combatant_ends_combat() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a"])).await.unwrap();

    assert_eq!(
        tm.remove_combatant(&eid("a")).await,
        Removal::CombatEnded { rounds_completed: 1 }
    );
    assert!(!tm.in_combat().await);
}

#[tokio::test(start_paused = true)]
async fn test_remove_unknown_combatant_is_not_present() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a"])).await.unwrap();
    assert_eq!(tm.remove_combatant(&eid("z")).await, Removal::NotPresent);
}

#[tokio::test(start_paused = true)]
async fn test_remove_combatant_prunes_groups() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();
    tm.set_combat_groups(CombatGroups::from([
        (eid("a"), eids(&["a", "b"])),
        (eid("c"), eids(&["c"])),
    ]))
    .await
    .unwrap();

    tm.remove_combatant(&eid("c")).await;

    let groups = tm.snapshot().await.combat_groups;
    assert_eq!(groups, CombatGroups::from([(eid("a"), eids(&["a", "b"]))]));
}

// ===========================================================================
// Explicit updates
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_apply_rejects_out_of_bounds_index() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();

    let result = tm.apply(TurnUpdate::CurrentIndex(2)).await;

    assert_eq!(
        result,
        Err(TurnError::Validation(ValidationError::IndexOutOfBounds {
            index: 2,
            len: 2
        }))
    );
    assert_eq!(tm.current_actor().await, Some(eid("a")));
}

#[tokio::test(start_paused = true)]
async fn test_apply_initiative_keeps_current_actor() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b", "c"])).await.unwrap();
    tm.advance_turn().await.unwrap();

    tm.apply(TurnUpdate::Initiative(eids(&["c", "a", "b"])))
        .await
        .unwrap();

    let snap = tm.snapshot().await;
    assert_eq!(snap.current, Some(eid("b")));
    assert_eq!(snap.current_index, 2);
}

#[tokio::test(start_paused = true)]
async fn test_apply_invalid_initiative_leaves_state_untouched() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();

    assert!(tm.apply(TurnUpdate::Initiative(vec![])).await.is_err());
    assert!(tm
        .apply(TurnUpdate::Initiative(eids(&["a", "a"])))
        .await
        .is_err());
    assert_eq!(tm.snapshot().await.initiative, eids(&["a", "b"]));
}

#[tokio::test(start_paused = true)]
async fn test_apply_round_and_timeout_validation() {
    let (tm, _rx) = manager();
    assert_eq!(tm.apply(TurnUpdate::Round(3)).await, Err(TurnError::NotInCombat));

    tm.start_combat(eids(&["a"])).await.unwrap();
    assert_eq!(
        tm.apply(TurnUpdate::Round(0)).await,
        Err(TurnError::Validation(ValidationError::ZeroRound))
    );
    assert_eq!(
        tm.apply(TurnUpdate::TurnTimeout(Duration::ZERO)).await,
        Err(TurnError::Validation(ValidationError::ZeroTimeout))
    );
    tm.apply(TurnUpdate::Round(4)).await.unwrap();
    assert_eq!(tm.round().await, 4);
}

#[tokio::test(start_paused = true)]
async fn test_apply_combat_groups_rejects_unknown_member() {
    let (tm, _rx) = manager();
    tm.start_combat(eids(&["a", "b"])).await.unwrap();

    let groups = CombatGroups::from([(eid("a"), eids(&["a", "zed"]))]);
    assert_eq!(
        tm.apply(TurnUpdate::CombatGroups(groups)).await,
        Err(TurnError::Validation(ValidationError::UnknownEntity(eid("zed"))))
    );
    assert!(tm.snapshot().await.combat_groups.is_empty());
}
