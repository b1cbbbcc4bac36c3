// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::inefficient_to_string)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(missing_docs)]

//! Multi-step wait scenarios driven through the condition scheduler with a
//! synthetic clock and hand-built telemetry.

use std::time::{Duration, Instant};

use brickdrive::scheduler::{ConditionScheduler, SchedulerEvent};
use brickdrive::{
    BlockCondition, InputPort, OutputPort, Port, PortData, ReplyOperation, ReplyOperationReply,
    Relation, Telemetry,
};

const DISTANCE: Port = Port::Input(InputPort::Two);
const LEFT_MOTOR: Port = Port::Output(OutputPort::A);

fn snapshot(distance: f32, tacho: f32) -> Telemetry {
    let ports = Port::ALL
        .iter()
        .enumerate()
        .map(|(port_index, port)| PortData {
            port_index,
            device_type: 126,
            mode: 0,
            value: match *port {
                DISTANCE => distance,
                LEFT_MOTOR => tacho,
                _ => 0.0,
            },
        })
        .collect();
    Telemetry::new(ports).unwrap()
}

fn fulfilled_sequences(events: &[SchedulerEvent]) -> Vec<u16> {
    events
        .iter()
        .filter_map(|event| match event {
            SchedulerEvent::Fulfilled(fulfillment) => Some(fulfillment.sequence),
            SchedulerEvent::Superseded { .. } => None,
        })
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn drive_until_close_to_a_wall() {
    let mut scheduler = ConditionScheduler::new();
    let now = Instant::now();
    scheduler.on_telemetry(snapshot(80.0, 0.0), None);

    let events = scheduler.activate(
        BlockCondition::AbsoluteValue {
            value: 20.0,
            relation: Relation::LessThan,
            port: DISTANCE,
        },
        1,
        now,
    );
    assert!(events.is_empty());

    for distance in [70.0, 55.0, 31.0, 20.0] {
        assert_eq!(scheduler.on_telemetry(snapshot(distance, 0.0), None), None);
    }
    let fulfillment = scheduler.on_telemetry(snapshot(19.5, 0.0), None).unwrap();
    assert_eq!(fulfillment.sequence, 1);
    assert_eq!(
        fulfillment.telemetry.unwrap().value(DISTANCE),
        Some(19.5)
    );
    assert_eq!(scheduler.active_condition(), None);
}

#[test]
fn turn_until_the_motor_has_moved_far_enough() {
    let mut scheduler = ConditionScheduler::new();
    scheduler.on_telemetry(snapshot(50.0, 100.0), None);
    scheduler.activate(
        BlockCondition::AnyChange {
            delta: 90.0,
            port: LEFT_MOTOR,
        },
        2,
        Instant::now(),
    );

    // Small steps add up against the fixed starting point.
    assert_eq!(scheduler.on_telemetry(snapshot(50.0, 130.0), None), None);
    assert_eq!(scheduler.on_telemetry(snapshot(50.0, 160.0), None), None);
    let fulfillment = scheduler.on_telemetry(snapshot(50.0, 190.0), None);
    assert_eq!(fulfillment.map(|f| f.sequence), Some(2));
}

#[test]
fn backing_up_counts_as_movement_too() {
    let mut scheduler = ConditionScheduler::new();
    scheduler.on_telemetry(snapshot(50.0, 100.0), None);
    scheduler.activate(
        BlockCondition::AnyChange {
            delta: 90.0,
            port: LEFT_MOTOR,
        },
        4,
        Instant::now(),
    );

    assert_eq!(scheduler.on_telemetry(snapshot(50.0, 40.0), None), None);
    assert_eq!(scheduler.on_telemetry(snapshot(50.0, 11.0), None), None);
    let fulfillment = scheduler.on_telemetry(snapshot(50.0, 10.0), None);
    assert_eq!(fulfillment.map(|f| f.sequence), Some(4));
}

#[test]
fn stall_detection_compares_consecutive_samples() {
    let mut scheduler = ConditionScheduler::new();
    scheduler.on_telemetry(snapshot(50.0, 0.0), None);
    scheduler.activate(
        BlockCondition::RateChange {
            delta: 40.0,
            port: LEFT_MOTOR,
        },
        3,
        Instant::now(),
    );

    // 30 per sample never reaches 40, even though the total does.
    for tacho in [30.0, 60.0, 90.0, 120.0] {
        assert_eq!(scheduler.on_telemetry(snapshot(50.0, tacho), None), None);
    }
    assert!(scheduler.on_telemetry(snapshot(50.0, 165.0), None).is_some());
}

#[test]
fn play_sound_then_wait_for_silence() {
    let mut scheduler = ConditionScheduler::new();
    scheduler.activate(BlockCondition::SoundNotBusy, 4, Instant::now());
    assert_eq!(scheduler.busy_check(), Some(ReplyOperation::SoundTest));

    assert_eq!(scheduler.on_telemetry(snapshot(0.0, 0.0), Some(true)), None);
    assert_eq!(scheduler.on_telemetry(snapshot(0.0, 0.0), None), None);
    let fulfillment = scheduler.on_telemetry(snapshot(0.0, 0.0), Some(false));
    assert_eq!(fulfillment.map(|f| f.sequence), Some(4));
    assert_eq!(scheduler.busy_check(), None);
}

#[test]
fn motors_check_only_their_own_ports() {
    let mut scheduler = ConditionScheduler::new();
    scheduler.activate(
        BlockCondition::OutputBusy {
            ports: vec![OutputPort::B, OutputPort::C],
        },
        5,
        Instant::now(),
    );
    assert_eq!(
        scheduler.busy_check(),
        Some(ReplyOperation::OutputTest {
            ports: vec![OutputPort::B, OutputPort::C]
        })
    );
}

#[test]
fn timed_steps_fire_in_deadline_order() {
    let mut scheduler = ConditionScheduler::new();
    let start = Instant::now();
    scheduler.activate(BlockCondition::Time { milliseconds: 300 }, 1, start);
    scheduler.activate(BlockCondition::Time { milliseconds: 100 }, 2, start);
    assert_eq!(
        scheduler.next_deadline(),
        Some(start + Duration::from_millis(100))
    );

    assert!(scheduler
        .poll_deadline(start + Duration::from_millis(50))
        .is_empty());
    let events = scheduler.poll_deadline(start + Duration::from_millis(100));
    assert_eq!(fulfilled_sequences(&events), vec![2]);
    let events = scheduler.poll_deadline(start + Duration::from_millis(300));
    assert_eq!(fulfilled_sequences(&events), vec![1]);
    assert_eq!(scheduler.next_deadline(), None);
}

#[test]
fn new_command_supersedes_a_pending_sensor_wait() {
    let mut scheduler = ConditionScheduler::new();
    let now = Instant::now();
    scheduler.activate(
        BlockCondition::AbsoluteValue {
            value: 5.0,
            relation: Relation::LessThanOrEqual,
            port: DISTANCE,
        },
        6,
        now,
    );
    let events = scheduler.activate(BlockCondition::Time { milliseconds: 0 }, 7, now);
    assert_eq!(
        events,
        vec![
            SchedulerEvent::Superseded { sequence: 6 },
            SchedulerEvent::Fulfilled(brickdrive::Fulfillment {
                sequence: 7,
                ..Default::default()
            }),
        ]
    );
    assert_eq!(scheduler.active_condition(), None);
}

#[test]
fn reply_wait_hands_back_the_decoded_replies() {
    let mut scheduler = ConditionScheduler::new();
    scheduler.activate(BlockCondition::Reply, 8, Instant::now());

    assert_eq!(
        scheduler.on_user_reply(9, vec![ReplyOperationReply::SoundBusy(true)]),
        None
    );
    let fulfillment = scheduler
        .on_user_reply(8, vec![ReplyOperationReply::SoundBusy(false)])
        .unwrap();
    assert_eq!(
        fulfillment.replies,
        vec![ReplyOperationReply::SoundBusy(false)]
    );
}

#[test]
fn failed_reply_drops_the_active_wait() {
    let mut scheduler = ConditionScheduler::new();
    scheduler.activate(BlockCondition::Reply, 1, Instant::now());
    assert!(!scheduler.on_user_reply_failed(2));
    assert!(scheduler.on_user_reply_failed(1));
    assert_eq!(scheduler.active_sequence(), None);
}

#[test]
fn clear_forgets_everything() {
    let mut scheduler = ConditionScheduler::new();
    let now = Instant::now();
    scheduler.on_telemetry(snapshot(1.0, 1.0), None);
    scheduler.activate(BlockCondition::Time { milliseconds: 500 }, 1, now);
    scheduler.clear();
    assert_eq!(scheduler.latest_telemetry(), None);
    assert_eq!(scheduler.next_deadline(), None);
    assert!(scheduler
        .poll_deadline(now + Duration::from_secs(1))
        .is_empty());
}
