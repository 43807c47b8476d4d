//! Scenario tests for the group, driven through the reference substrate.

use bytes::Bytes;
use lodestone_harness::LogDriver;
use lodestone_rsm::{CompactionKind, Delivery};
use lodestone_types::{LogIndex, MemberId, Persistence, SessionId};

use crate::events::GroupEvent;
use crate::group::{Group, GroupConfig, GroupError};
use crate::ops::{
    DeliveryPolicy, Dispatch, GroupCommand, GroupOutput, MemberInfo, SubmitRequest,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Session that registers as the group listener in [`driver`].
const LISTENER: u64 = 9;

fn session(id: u64) -> SessionId {
    SessionId::new(id)
}

fn m(id: &str) -> MemberId {
    MemberId::new(id)
}

fn join(member: &str) -> GroupCommand {
    GroupCommand::Join {
        member_id: m(member),
        persistence: Persistence::Persistent,
    }
}

fn join_ephemeral(member: &str) -> GroupCommand {
    GroupCommand::Join {
        member_id: m(member),
        persistence: Persistence::Ephemeral,
    }
}

fn leave(member: &str) -> GroupCommand {
    GroupCommand::Leave {
        member_id: m(member),
    }
}

fn submit(target: Option<&str>, dispatch: Dispatch, delivery: DeliveryPolicy) -> GroupCommand {
    GroupCommand::Submit(SubmitRequest {
        target: target.map(m),
        dispatch,
        delivery,
        message_id: 7,
        kind: "task".into(),
        payload: Bytes::from_static(b"work"),
    })
}

fn direct(target: &str) -> GroupCommand {
    submit(Some(target), Dispatch::Direct, DeliveryPolicy::Once)
}

fn ack(member: &str, id: LogIndex) -> GroupCommand {
    GroupCommand::Ack {
        member_id: m(member),
        id,
        succeeded: true,
    }
}

fn fail_ack(member: &str, id: LogIndex) -> GroupCommand {
    GroupCommand::Ack {
        member_id: m(member),
        id,
        succeeded: false,
    }
}

/// A driver with sessions 1-3 open and a listener registered on session 9.
fn driver_with(config: GroupConfig) -> LogDriver<Group> {
    let mut driver = LogDriver::new(Group::new(config));
    for s in [1, 2, 3, LISTENER] {
        driver.open_session(session(s));
    }
    driver
        .commit(session(LISTENER), GroupCommand::Listen)
        .expect("listen cannot fail");
    driver.take_events();
    driver
}

fn driver() -> LogDriver<Group> {
    driver_with(GroupConfig::default())
}

fn commit(driver: &mut LogDriver<Group>, from: u64, command: GroupCommand) -> GroupOutput {
    driver
        .commit(session(from), command)
        .expect("command should apply")
}

/// Event names delivered to `to`, in publish order.
fn names(events: &[Delivery<GroupEvent>], to: u64) -> Vec<&'static str> {
    events
        .iter()
        .filter(|d| d.session == session(to))
        .map(|d| d.event.name())
        .collect()
}

fn events_for(events: &[Delivery<GroupEvent>], to: u64) -> Vec<GroupEvent> {
    events
        .iter()
        .filter(|d| d.session == session(to))
        .map(|d| d.event.clone())
        .collect()
}

// ============================================================================
// Join & election
// ============================================================================

#[test]
fn first_join_becomes_leader() {
    let mut driver = driver();

    let output = commit(&mut driver, 1, join("a"));
    let index = driver.last_index();

    assert_eq!(
        output,
        GroupOutput::Member(MemberInfo {
            id: m("a"),
            index
        })
    );
    assert_eq!(driver.machine().leader(), Some(&m("a")));
    assert_eq!(driver.machine().term(), index.as_u64());
    assert!(!driver.machine().is_candidate(&m("a")));

    let events = driver.take_events();
    assert_eq!(names(&events, LISTENER), vec!["join", "term", "elect"]);
}

#[test]
fn later_joins_become_candidates() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    let term = driver.machine().term();
    commit(&mut driver, 2, join("b"));

    assert_eq!(driver.machine().leader(), Some(&m("a")));
    assert_eq!(driver.machine().term(), term);
    assert!(driver.machine().is_candidate(&m("b")));

    let events = driver.take_events();
    assert_eq!(names(&events, LISTENER), vec!["join", "term", "elect", "join"]);
}

#[test]
fn listen_returns_the_membership_snapshot() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    let a_index = driver.last_index();
    commit(&mut driver, 2, join("b"));
    let b_index = driver.last_index();

    let output = commit(&mut driver, 3, GroupCommand::Listen);
    assert_eq!(
        output,
        GroupOutput::Members(vec![
            MemberInfo {
                id: m("a"),
                index: a_index
            },
            MemberInfo {
                id: m("b"),
                index: b_index
            },
        ])
    );
}

#[test]
fn ephemeral_identities_cannot_be_recreated() {
    let mut driver = driver();

    commit(&mut driver, 1, join_ephemeral("a"));

    let result = driver.commit(session(2), join_ephemeral("a"));
    let rejected = driver.last_index();
    assert!(matches!(
        result,
        Err(GroupError::EphemeralMemberExists(id)) if id == m("a")
    ));

    // The failed commit is released and state is untouched.
    assert!(driver.is_released(rejected));
    assert_eq!(driver.machine().member_ids(), vec![m("a")]);
}

#[test]
fn persistent_rejoin_keeps_the_original_identity_tag() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    let original = driver.last_index();

    driver.expire_session(session(1));
    assert!(!driver.machine().is_candidate(&m("a")));
    driver.take_events();

    let output = commit(&mut driver, 2, join("a"));
    let rebind = driver.last_index();

    // The member keeps its original index; the new Join commit is released
    // while the original remains the membership record.
    assert_eq!(
        output,
        GroupOutput::Member(MemberInfo {
            id: m("a"),
            index: original
        })
    );
    assert!(driver.is_released(rebind));
    assert!(!driver.is_released(original));
}

#[test]
fn persistent_leader_rejoin_forces_a_handoff() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    let term_before = driver.machine().term();
    driver.take_events();

    // The leader's client restarts and rejoins from a new session while
    // still leader: leadership is renegotiated.
    commit(&mut driver, 2, join("a"));

    assert!(driver.machine().term() > term_before);
    // Sole member: the re-election lands on the same id.
    assert_eq!(driver.machine().leader(), Some(&m("a")));

    let events = driver.take_events();
    assert_eq!(
        names(&events, LISTENER),
        vec!["join", "resign", "term", "elect"]
    );
}

#[test]
fn leave_of_the_leader_reelects() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    let a_join = driver.last_index();
    commit(&mut driver, 2, join("b"));
    let term_before = driver.machine().term();
    driver.take_events();

    commit(&mut driver, 1, leave("a"));

    assert!(!driver.machine().is_member(&m("a")));
    assert_eq!(driver.machine().leader(), Some(&m("b")));
    assert!(driver.machine().term() > term_before);
    assert!(driver.is_released(a_join));

    let events = driver.take_events();
    assert_eq!(
        names(&events, LISTENER),
        vec!["resign", "term", "elect", "leave"]
    );
}

#[test]
fn leave_of_an_unknown_member_is_a_noop() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    driver.take_events();

    assert_eq!(commit(&mut driver, 1, leave("ghost")), GroupOutput::Unit);
    assert!(driver.take_events().is_empty());
    assert_eq!(driver.machine().member_ids(), vec![m("a")]);
}

// ============================================================================
// Session departure
// ============================================================================

#[test]
fn ephemeral_member_is_removed_with_its_session() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, join_ephemeral("b"));
    let b_join = driver.last_index();
    let term = driver.machine().term();
    driver.take_events();

    driver.close_session(session(2));

    assert_eq!(driver.machine().member_ids(), vec![m("a")]);
    assert_eq!(driver.machine().leader(), Some(&m("a")));
    assert_eq!(driver.machine().term(), term);
    assert!(driver.is_released(b_join));

    let events = driver.take_events();
    assert_eq!(names(&events, LISTENER), vec!["leave"]);
}

#[test]
fn sessionless_persistent_leader_resigns() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, join("b"));
    let term_before = driver.machine().term();
    driver.take_events();

    driver.close_session(session(1));

    // a survives session loss but loses candidacy and leadership.
    assert!(driver.machine().is_member(&m("a")));
    assert!(!driver.machine().is_candidate(&m("a")));
    assert_eq!(driver.machine().leader(), Some(&m("b")));
    assert!(driver.machine().term() > term_before);

    let events = driver.take_events();
    assert_eq!(
        names(&events, LISTENER),
        vec!["leave", "resign", "term", "elect"]
    );
}

#[test]
fn grace_period_defers_the_leave_announcement() {
    let mut driver = driver_with(GroupConfig::testing());

    commit(&mut driver, 1, join("a"));
    driver.take_events();

    // The leadership fallout is announced, but not the departure.
    driver.close_session(session(1));
    assert!(!names(&driver.take_events(), LISTENER).contains(&"leave"));

    driver.advance_time(99);
    driver.tick();
    assert!(names(&driver.take_events(), LISTENER).is_empty());

    driver.advance_time(1);
    driver.tick();
    assert_eq!(names(&driver.take_events(), LISTENER), vec!["leave"]);

    // Membership itself is unaffected: persistent members persist.
    assert!(driver.machine().is_member(&m("a")));
}

#[test]
fn rejoin_within_the_grace_period_suppresses_the_leave() {
    let mut driver = driver_with(GroupConfig::testing());

    commit(&mut driver, 1, join("a"));
    driver.take_events();

    driver.close_session(session(1));
    driver.advance_time(50);
    commit(&mut driver, 2, join("a"));
    driver.take_events();

    driver.advance_time(100);
    driver.tick();

    assert!(names(&driver.take_events(), LISTENER).is_empty());
}

// ============================================================================
// Deterministic randomness
// ============================================================================

#[test]
fn elections_agree_across_replicas() {
    let run = || {
        let mut driver = driver();
        commit(&mut driver, 1, join("a"));
        commit(&mut driver, 2, join("b"));
        commit(&mut driver, 3, join("c"));
        commit(&mut driver, 1, leave("a"));
        (
            driver.machine().leader().cloned(),
            driver.machine().term(),
        )
    };

    assert_eq!(run(), run());
}

#[test]
fn random_dispatch_agrees_across_replicas() {
    let run = || {
        let mut driver = driver();
        commit(&mut driver, 1, join("a"));
        commit(&mut driver, 1, join("b"));
        commit(&mut driver, 1, join("c"));
        commit(
            &mut driver,
            2,
            submit(None, Dispatch::Random, DeliveryPolicy::Once),
        );
        let holder = ["a", "b", "c"]
            .into_iter()
            .find(|id| driver.machine().in_flight(&m(id)).is_some());
        holder.expect("one member holds the message")
    };

    assert_eq!(run(), run());
}

// ============================================================================
// Message pipeline
// ============================================================================

#[test]
fn direct_submit_delivers_to_the_target_session() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    driver.take_events();

    commit(&mut driver, 2, direct("a"));
    let id = driver.last_index();

    assert_eq!(driver.machine().in_flight(&m("a")), Some(id));

    let events = events_for(&driver.take_events(), 1);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0],
        GroupEvent::Message {
            index: id,
            member: m("a"),
            kind: "task".into(),
            payload: Bytes::from_static(b"work"),
        }
    );
}

#[test]
fn direct_ack_echoes_the_submission_to_the_producer() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, direct("a"));
    let id = driver.last_index();
    driver.take_events();

    commit(&mut driver, 1, ack("a", id));
    let ack_commit = driver.last_index();

    assert_eq!(driver.machine().in_flight(&m("a")), None);
    assert!(driver.is_released(id));
    assert!(driver.is_released(ack_commit));

    let events = events_for(&driver.take_events(), 2);
    assert!(
        matches!(&events[..], [GroupEvent::Ack(request)] if request.message_id == 7),
        "producer should receive exactly one ack: {events:?}"
    );
}

#[test]
fn direct_submit_to_a_missing_member_fails_the_producer() {
    let mut driver = driver();

    commit(&mut driver, 2, direct("ghost"));
    let id = driver.last_index();

    assert!(driver.is_released(id));
    let events = driver.take_events();
    assert_eq!(names(&events, 2), vec!["fail"]);
}

#[test]
fn random_submit_to_an_empty_group_fails_the_producer() {
    let mut driver = driver();

    commit(
        &mut driver,
        2,
        submit(None, Dispatch::Random, DeliveryPolicy::Once),
    );

    assert!(driver.is_released(driver.last_index()));
    assert_eq!(names(&driver.take_events(), 2), vec!["fail"]);
}

#[test]
fn messages_queue_behind_the_in_flight_slot() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    driver.take_events();

    commit(&mut driver, 2, direct("a"));
    let first = driver.last_index();
    commit(&mut driver, 2, direct("a"));
    let second = driver.last_index();

    // At most one in flight; the second submit queues silently.
    assert_eq!(driver.machine().in_flight(&m("a")), Some(first));
    assert_eq!(driver.machine().queued(&m("a")), 1);
    let events = events_for(&driver.take_events(), 1);
    assert_eq!(events.len(), 1);

    // Acking the first promotes the second, in submit order.
    commit(&mut driver, 1, ack("a", first));
    assert_eq!(driver.machine().in_flight(&m("a")), Some(second));
    assert_eq!(driver.machine().queued(&m("a")), 0);

    let events = events_for(&driver.take_events(), 1);
    assert!(
        matches!(&events[..], [GroupEvent::Message { index, .. }] if *index == second),
        "second message should be published on promotion: {events:?}"
    );
}

#[test]
fn broadcast_acks_the_producer_exactly_once() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, join("b"));
    driver.take_events();

    commit(
        &mut driver,
        3,
        submit(None, Dispatch::Broadcast, DeliveryPolicy::Once),
    );
    let id = driver.last_index();

    // Both members hold a copy.
    assert_eq!(driver.machine().in_flight(&m("a")), Some(id));
    assert_eq!(driver.machine().in_flight(&m("b")), Some(id));
    driver.take_events();

    // First ack clears a's slot but b still holds an index <= id.
    commit(&mut driver, 1, ack("a", id));
    assert_eq!(names(&driver.take_events(), 3), Vec::<&str>::new());
    assert!(!driver.is_released(id));

    // Second ack completes the broadcast: exactly one ack, one release.
    commit(&mut driver, 2, ack("b", id));
    assert_eq!(names(&driver.take_events(), 3), vec!["ack"]);
    assert!(driver.is_released(id));
}

#[test]
fn broadcast_to_an_empty_group_is_vacuously_complete() {
    let mut driver = driver();

    commit(
        &mut driver,
        3,
        submit(None, Dispatch::Broadcast, DeliveryPolicy::Once),
    );

    assert!(driver.is_released(driver.last_index()));
    assert_eq!(names(&driver.take_events(), 3), vec!["ack"]);
}

#[test]
fn completion_is_a_global_low_watermark() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, join("b"));
    commit(&mut driver, 3, join("c"));
    driver.take_events();

    // An older direct message sits in flight at c.
    commit(&mut driver, 2, direct("c"));
    let older = driver.last_index();

    // A younger broadcast goes to everyone.
    commit(
        &mut driver,
        3,
        submit(None, Dispatch::Broadcast, DeliveryPolicy::Once),
    );
    let broadcast = driver.last_index();
    driver.take_events();

    // a and b ack their broadcast copies, but c still holds the older
    // direct message, so the broadcast is not yet complete.
    commit(&mut driver, 1, ack("a", broadcast));
    commit(&mut driver, 2, ack("b", broadcast));
    assert_eq!(names(&driver.take_events(), 3), Vec::<&str>::new());
    assert!(!driver.is_released(broadcast));

    // Acking the older message promotes c's queued broadcast copy.
    commit(&mut driver, 3, ack("c", older));
    let events = driver.take_events();
    assert_eq!(names(&events, 2), vec!["ack"]); // direct producer
    assert_eq!(names(&events, 3), vec!["message"]); // c's promoted copy
    assert_eq!(driver.machine().in_flight(&m("c")), Some(broadcast));

    // The final ack completes the broadcast exactly once.
    commit(&mut driver, 3, ack("c", broadcast));
    assert_eq!(names(&driver.take_events(), 3), vec!["ack"]);
    assert!(driver.is_released(broadcast));
}

#[test]
fn failed_direct_ack_fails_the_producer() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, direct("a"));
    let id = driver.last_index();
    driver.take_events();

    commit(&mut driver, 1, fail_ack("a", id));

    assert_eq!(names(&driver.take_events(), 2), vec!["fail"]);
    assert!(driver.is_released(id));
}

#[test]
fn failed_broadcast_copy_finalizes_as_fail() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, join("b"));
    driver.take_events();

    commit(
        &mut driver,
        3,
        submit(None, Dispatch::Broadcast, DeliveryPolicy::Once),
    );
    let id = driver.last_index();
    driver.take_events();

    commit(&mut driver, 1, fail_ack("a", id));
    assert_eq!(names(&driver.take_events(), 3), Vec::<&str>::new());

    // The recorded failure turns the finalization into a fail, delivered
    // exactly once when the watermark clears.
    commit(&mut driver, 2, ack("b", id));
    assert_eq!(names(&driver.take_events(), 3), vec!["fail"]);
    assert!(driver.is_released(id));
}

#[test]
fn spurious_acks_are_ignored() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, direct("a"));
    let id = driver.last_index();
    driver.take_events();

    // Unknown member.
    commit(&mut driver, 1, ack("ghost", id));
    // Stale id.
    commit(&mut driver, 1, ack("a", LogIndex::new(1)));
    assert!(driver.take_events().is_empty());
    assert_eq!(driver.machine().in_flight(&m("a")), Some(id));

    // Ack for an already-cleared slot.
    commit(&mut driver, 1, ack("a", id));
    driver.take_events();
    commit(&mut driver, 1, ack("a", id));
    assert!(driver.take_events().is_empty());
}

#[test]
fn rejoin_republishes_the_in_flight_message() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, direct("a"));
    let id = driver.last_index();
    driver.take_events();

    // The session that saw the message event dies; the message survives
    // because the member is persistent.
    driver.expire_session(session(1));
    assert_eq!(driver.machine().in_flight(&m("a")), Some(id));
    driver.take_events();

    // The new session must learn about the held message.
    commit(&mut driver, 3, join("a"));
    let events = events_for(&driver.take_events(), 3);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, GroupEvent::Message { index, .. } if *index == id)),
        "rebound session should see the in-flight message: {events:?}"
    );
}

// ============================================================================
// Member close
// ============================================================================

#[test]
fn close_reassigns_random_retry_messages() {
    let mut driver = driver();

    commit(&mut driver, 1, join_ephemeral("a"));
    commit(&mut driver, 2, join_ephemeral("b"));
    driver.take_events();

    commit(
        &mut driver,
        3,
        submit(None, Dispatch::Random, DeliveryPolicy::Retry),
    );
    let id = driver.last_index();

    let holder = ["a", "b"]
        .into_iter()
        .find(|id| driver.machine().in_flight(&m(id)).is_some())
        .expect("one member holds the message");
    let survivor = if holder == "a" { "b" } else { "a" };
    let holder_session = if holder == "a" { 1 } else { 2 };
    driver.take_events();

    driver.close_session(session(holder_session));

    // The message moved to the surviving member; the producer saw nothing.
    assert_eq!(driver.machine().in_flight(&m(survivor)), Some(id));
    assert!(!driver.is_released(id));
    assert_eq!(names(&driver.take_events(), 3), Vec::<&str>::new());
}

#[test]
fn close_fails_random_once_messages() {
    let mut driver = driver();

    commit(&mut driver, 1, join_ephemeral("a"));
    driver.take_events();

    commit(
        &mut driver,
        3,
        submit(None, Dispatch::Random, DeliveryPolicy::Once),
    );
    let id = driver.last_index();
    driver.take_events();

    driver.close_session(session(1));

    assert_eq!(names(&driver.take_events(), 3), vec!["fail"]);
    assert!(driver.is_released(id));
}

#[test]
fn close_fails_direct_messages_immediately() {
    let mut driver = driver();

    commit(&mut driver, 1, join_ephemeral("a"));
    driver.take_events();

    commit(&mut driver, 2, direct("a"));
    let id = driver.last_index();
    driver.take_events();

    driver.close_session(session(1));

    let events = driver.take_events();
    assert_eq!(names(&events, 2), vec!["fail"]);
    // The member close precedes the leave announcement, which is the last
    // thing listeners hear about the member.
    assert_eq!(names(&events, LISTENER).last(), Some(&"leave"));
    assert!(driver.is_released(id));
}

#[test]
fn retry_with_no_survivors_fails_the_producer() {
    let mut driver = driver();

    commit(&mut driver, 1, join_ephemeral("a"));
    driver.take_events();

    commit(
        &mut driver,
        3,
        submit(None, Dispatch::Random, DeliveryPolicy::Retry),
    );
    let id = driver.last_index();
    driver.take_events();

    driver.close_session(session(1));

    assert_eq!(names(&driver.take_events(), 3), vec!["fail"]);
    assert!(driver.is_released(id));
}

// ============================================================================
// Retention & compaction
// ============================================================================

#[test]
fn live_membership_records_survive_compaction() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    let join_index = driver.last_index();
    commit(
        &mut driver,
        2,
        submit(None, Dispatch::Broadcast, DeliveryPolicy::Once),
    );
    let submit_index = driver.last_index();

    let report = driver.compact(CompactionKind::Major);
    assert_eq!(report.dropped, 0);

    let retained = driver.retained();
    assert!(retained.contains(&join_index));
    assert!(retained.contains(&submit_index));
}

#[test]
fn ack_and_leave_commits_are_transient() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, direct("a"));
    let message = driver.last_index();

    commit(&mut driver, 1, ack("a", message));
    assert!(driver.is_released(driver.last_index()));

    commit(&mut driver, 1, leave("a"));
    assert!(driver.is_released(driver.last_index()));
}

#[test]
fn nothing_is_retained_after_the_group_winds_down() {
    let mut driver = driver();

    commit(&mut driver, 1, join("a"));
    commit(&mut driver, 2, join_ephemeral("b"));
    commit(&mut driver, 3, direct("a"));
    let message = driver.last_index();
    commit(&mut driver, 1, ack("a", message));
    commit(&mut driver, 1, leave("a"));
    driver.close_session(session(2));

    // Only the Listen registration is still live.
    driver.compact(CompactionKind::Major);
    let retained = driver.retained();
    assert_eq!(retained.len(), 1);

    driver.close_session(session(LISTENER));
    driver.compact(CompactionKind::Major);
    assert!(driver.retained().is_empty());
}

#[test]
fn relisten_replaces_the_registration() {
    let mut driver = driver();

    let first = {
        // The registration from driver setup.
        let retained = driver.retained();
        assert_eq!(retained.len(), 1);
        retained[0]
    };

    commit(&mut driver, LISTENER, GroupCommand::Listen);
    let second = driver.last_index();

    assert!(driver.is_released(first));
    assert!(!driver.is_released(second));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn config_serializes_round_trip() {
    let config = GroupConfig::testing();
    let json = serde_json::to_string(&config).expect("serialize");
    let back: GroupConfig = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(config, back);
}

// ============================================================================
// Properties
// ============================================================================

mod properties {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone)]
    enum Step {
        Join { member: u8, ephemeral: bool },
        Leave { member: u8 },
        SubmitDirect { member: u8 },
        SubmitRandom,
        SubmitBroadcast,
        AckHead { member: u8, succeeded: bool },
        Advance { millis: i64 },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..4, any::<bool>()).prop_map(|(member, ephemeral)| Step::Join {
                member,
                ephemeral
            }),
            (0u8..4).prop_map(|member| Step::Leave { member }),
            (0u8..4).prop_map(|member| Step::SubmitDirect { member }),
            Just(Step::SubmitRandom),
            Just(Step::SubmitBroadcast),
            (0u8..4, any::<bool>()).prop_map(|(member, succeeded)| Step::AckHead {
                member,
                succeeded
            }),
            (0i64..50).prop_map(|millis| Step::Advance { millis }),
        ]
    }

    fn apply(driver: &mut LogDriver<Group>, steps: &[Step]) -> Vec<String> {
        let mut outputs = Vec::new();
        for s in steps {
            match s {
                Step::Join { member, ephemeral } => {
                    let command = if *ephemeral {
                        join_ephemeral(&member.to_string())
                    } else {
                        join(&member.to_string())
                    };
                    outputs.push(format!("{:?}", driver.commit(session(1), command)));
                }
                Step::Leave { member } => {
                    outputs.push(format!(
                        "{:?}",
                        driver.commit(session(1), leave(&member.to_string()))
                    ));
                }
                Step::SubmitDirect { member } => {
                    outputs.push(format!(
                        "{:?}",
                        driver.commit(session(2), direct(&member.to_string()))
                    ));
                }
                Step::SubmitRandom => {
                    outputs.push(format!(
                        "{:?}",
                        driver.commit(
                            session(2),
                            submit(None, Dispatch::Random, DeliveryPolicy::Retry)
                        )
                    ));
                }
                Step::SubmitBroadcast => {
                    outputs.push(format!(
                        "{:?}",
                        driver.commit(
                            session(3),
                            submit(None, Dispatch::Broadcast, DeliveryPolicy::Once)
                        )
                    ));
                }
                Step::AckHead { member, succeeded } => {
                    let id = m(member.to_string().as_str());
                    if let Some(head) = driver.machine().in_flight(&id) {
                        let command = GroupCommand::Ack {
                            member_id: id,
                            id: head,
                            succeeded: *succeeded,
                        };
                        outputs.push(format!("{:?}", driver.commit(session(1), command)));
                    }
                }
                Step::Advance { millis } => driver.advance_time(*millis),
            }
        }
        outputs
    }

    proptest! {
        /// Two replicas fed the same commit prefix hold identical
        /// leadership, membership, queues, events, and retention.
        #[test]
        fn replicas_are_deterministic(steps in prop::collection::vec(step(), 1..50)) {
            let mut replica1 = driver();
            let mut replica2 = driver();

            let out1 = apply(&mut replica1, &steps);
            let out2 = apply(&mut replica2, &steps);

            prop_assert_eq!(out1, out2);
            prop_assert_eq!(replica1.machine().leader(), replica2.machine().leader());
            prop_assert_eq!(replica1.machine().term(), replica2.machine().term());
            prop_assert_eq!(replica1.machine().member_ids(), replica2.machine().member_ids());
            prop_assert_eq!(replica1.take_events(), replica2.take_events());
            prop_assert_eq!(replica1.retained(), replica2.retained());
        }

        /// The leader, when present, is always a live member and never a
        /// candidate.
        #[test]
        fn leader_is_always_a_member(steps in prop::collection::vec(step(), 1..50)) {
            let mut d = driver();
            for s in &steps {
                apply(&mut d, std::slice::from_ref(s));
                if let Some(leader) = d.machine().leader() {
                    prop_assert!(d.machine().is_member(leader));
                    prop_assert!(!d.machine().is_candidate(leader));
                }
            }
        }
    }
}
