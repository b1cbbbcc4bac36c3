//! Condition evaluation for user commands.
//!
//! [`ConditionScheduler`] owns the single active [`BlockCondition`] and the
//! telemetry it is evaluated against. It is a plain state machine: the link
//! loop activates conditions as user commands are dispatched, feeds it
//! replies, telemetry and clock ticks, and acts on the [`SchedulerEvent`]s it
//! returns.
//!
//! Baselines differ by condition:
//! - `rate_change` re-captures its baseline on every unfulfilled cycle, so it
//!   measures the change between consecutive samples
//! - `any_change` keeps the baseline captured at activation, so it measures
//!   total displacement

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use crate::model::{BlockCondition, Port, ReplyOperation, ReplyOperationReply, Telemetry};

/// A satisfied condition.
#[derive(Clone, Debug, PartialEq, Default, Serialize)]
pub struct Fulfillment {
    /// Sequence number of the user command the condition belonged to.
    pub sequence: u16,
    /// Decoded replies, for reply conditions.
    pub replies: Vec<ReplyOperationReply>,
    /// The snapshot that satisfied a telemetry-driven condition.
    pub telemetry: Option<Telemetry>,
}

/// Outcome of feeding the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub enum SchedulerEvent {
    /// The active condition was met.
    Fulfilled(Fulfillment),
    /// A newer condition replaced this one before it was satisfied.
    Superseded {
        /// Sequence of the replaced condition.
        sequence: u16,
    },
}

#[derive(Clone, Debug)]
struct ActiveCondition {
    sequence: u16,
    condition: BlockCondition,
    baseline: Option<Telemetry>,
}

/// Holds the active wait condition and the latest telemetry.
#[derive(Debug, Default)]
pub struct ConditionScheduler {
    active: Option<ActiveCondition>,
    latest: Option<Telemetry>,
    timers: Vec<(Instant, u16)>,
}

impl ConditionScheduler {
    /// Scheduler with no condition and no telemetry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `condition` the active one for the command `sequence`.
    pub fn activate(
        &mut self,
        condition: BlockCondition,
        sequence: u16,
        now: Instant,
    ) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        if let Some(previous) = self.active.take() {
            if !matches!(previous.condition, BlockCondition::Time { .. })
                && previous.sequence != sequence
            {
                debug!(
                    sequence = previous.sequence,
                    condition = previous.condition.name(),
                    "condition superseded"
                );
                events.push(SchedulerEvent::Superseded {
                    sequence: previous.sequence,
                });
            }
        }

        debug!(sequence, condition = condition.name(), "condition active");
        let baseline = match condition {
            BlockCondition::RateChange { .. } | BlockCondition::AnyChange { .. } => {
                self.latest.clone()
            }
            _ => None,
        };

        if let BlockCondition::Time { milliseconds } = condition {
            if milliseconds == 0 {
                events.push(SchedulerEvent::Fulfilled(Fulfillment {
                    sequence,
                    ..Fulfillment::default()
                }));
                return events;
            }
            self.timers
                .push((now + Duration::from_millis(milliseconds), sequence));
        }

        self.active = Some(ActiveCondition {
            sequence,
            condition,
            baseline,
        });
        events
    }

    /// Fire every time condition whose delay has elapsed.
    pub fn poll_deadline(&mut self, now: Instant) -> Vec<SchedulerEvent> {
        let (due, pending): (Vec<_>, Vec<_>) =
            self.timers.drain(..).partition(|(deadline, _)| *deadline <= now);
        self.timers = pending;

        due.into_iter()
            .map(|(_, sequence)| {
                if self.active.as_ref().is_some_and(|active| {
                    active.sequence == sequence
                        && matches!(active.condition, BlockCondition::Time { .. })
                }) {
                    self.active = None;
                }
                debug!(sequence, "time condition elapsed");
                SchedulerEvent::Fulfilled(Fulfillment {
                    sequence,
                    ..Fulfillment::default()
                })
            })
            .collect()
    }

    /// Earliest pending time-condition deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|(deadline, _)| *deadline).min()
    }

    /// A user-initiated reply arrived for `sequence`.
    pub fn on_user_reply(
        &mut self,
        sequence: u16,
        replies: Vec<ReplyOperationReply>,
    ) -> Option<Fulfillment> {
        let matches = self.active.as_ref().is_some_and(|active| {
            active.sequence == sequence && active.condition == BlockCondition::Reply
        });
        if !matches {
            return None;
        }
        self.active = None;
        debug!(sequence, "reply condition fulfilled");
        Some(Fulfillment {
            sequence,
            replies,
            telemetry: None,
        })
    }

    /// A reply-bearing user command failed; its reply condition can never be
    /// met. Returns true when that condition was the active one.
    pub fn on_user_reply_failed(&mut self, sequence: u16) -> bool {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|active| active.sequence == sequence);
        if matches {
            self.active = None;
        }
        matches
    }

    /// A fresh telemetry snapshot arrived, with the busy flag of an appended
    /// sound or output test if one was requested.
    pub fn on_telemetry(&mut self, telemetry: Telemetry, busy: Option<bool>) -> Option<Fulfillment> {
        self.latest = Some(telemetry.clone());
        let active = self.active.as_mut()?;

        let fulfilled = match &active.condition {
            BlockCondition::AbsoluteValue {
                value,
                relation,
                port,
            } => telemetry
                .value(*port)
                .is_some_and(|current| relation.holds(current, *value)),
            BlockCondition::RateChange { delta, port } => {
                let fulfilled = active
                    .baseline
                    .as_ref()
                    .and_then(|baseline| change(baseline, &telemetry, *port))
                    .is_some_and(|rate| {
                        trace!(%port, rate, delta, "rate change");
                        (*delta < 0.0 && rate <= *delta) || (*delta >= 0.0 && rate >= *delta)
                    });
                if !fulfilled {
                    active.baseline = Some(telemetry.clone());
                }
                fulfilled
            }
            BlockCondition::AnyChange { delta, port } => match &active.baseline {
                Some(baseline) => {
                    change(baseline, &telemetry, *port).is_some_and(|moved| moved.abs() >= *delta)
                }
                None => {
                    active.baseline = Some(telemetry.clone());
                    false
                }
            },
            BlockCondition::OutputBusy { .. } | BlockCondition::SoundNotBusy => busy == Some(false),
            BlockCondition::Time { .. } | BlockCondition::Reply => false,
        };

        if !fulfilled {
            return None;
        }
        let sequence = active.sequence;
        debug!(
            sequence,
            condition = active.condition.name(),
            "telemetry condition fulfilled"
        );
        self.active = None;
        Some(Fulfillment {
            sequence,
            replies: Vec::new(),
            telemetry: Some(telemetry),
        })
    }

    /// The busy test to append to the next telemetry poll, if the active
    /// condition needs one.
    pub fn busy_check(&self) -> Option<ReplyOperation> {
        match &self.active.as_ref()?.condition {
            BlockCondition::SoundNotBusy => Some(ReplyOperation::SoundTest),
            BlockCondition::OutputBusy { ports } => Some(ReplyOperation::OutputTest {
                ports: ports.clone(),
            }),
            _ => None,
        }
    }

    /// Condition currently waited on.
    pub fn active_condition(&self) -> Option<&BlockCondition> {
        self.active.as_ref().map(|active| &active.condition)
    }

    /// Sequence of the command whose condition is active.
    pub fn active_sequence(&self) -> Option<u16> {
        self.active.as_ref().map(|active| active.sequence)
    }

    /// Most recent snapshot.
    pub fn latest_telemetry(&self) -> Option<&Telemetry> {
        self.latest.as_ref()
    }

    /// Forget the active condition, pending timers and telemetry.
    pub fn clear(&mut self) {
        self.active = None;
        self.timers.clear();
        self.latest = None;
    }
}

fn change(baseline: &Telemetry, latest: &Telemetry, port: Port) -> Option<f32> {
    Some(latest.value(port)? - baseline.value(port)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputPort, OutputPort, PortData, Relation};

    const PORT: Port = Port::Input(InputPort::Two);

    fn snapshot(value: f32) -> Telemetry {
        let ports = (0..8)
            .map(|port_index| PortData {
                port_index,
                device_type: 30,
                mode: 0,
                value: if port_index == 1 { value } else { 0.0 },
            })
            .collect();
        Telemetry::new(ports).unwrap()
    }

    #[test]
    fn zero_time_fulfills_immediately() {
        let mut scheduler = ConditionScheduler::new();
        let events = scheduler.activate(BlockCondition::Time { milliseconds: 0 }, 4, Instant::now());
        assert!(matches!(
            events.as_slice(),
            [SchedulerEvent::Fulfilled(Fulfillment { sequence: 4, .. })]
        ));
        assert!(scheduler.active_condition().is_none());
    }

    #[test]
    fn time_fires_at_deadline() {
        let mut scheduler = ConditionScheduler::new();
        let now = Instant::now();
        scheduler.activate(BlockCondition::Time { milliseconds: 100 }, 2, now);
        assert_eq!(scheduler.next_deadline(), Some(now + Duration::from_millis(100)));
        assert!(scheduler.poll_deadline(now + Duration::from_millis(99)).is_empty());
        let events = scheduler.poll_deadline(now + Duration::from_millis(100));
        assert_eq!(events.len(), 1);
        assert!(scheduler.active_condition().is_none());
        assert!(scheduler.next_deadline().is_none());
    }

    #[test]
    fn reply_condition_needs_matching_sequence() {
        let mut scheduler = ConditionScheduler::new();
        scheduler.activate(BlockCondition::Reply, 3, Instant::now());
        assert!(scheduler.on_user_reply(4, Vec::new()).is_none());
        let fulfillment = scheduler
            .on_user_reply(3, vec![ReplyOperationReply::SoundBusy(false)])
            .unwrap();
        assert_eq!(fulfillment.replies.len(), 1);
        assert!(scheduler.on_user_reply(3, Vec::new()).is_none());
    }

    #[test]
    fn absolute_value_compares_port_value() {
        let mut scheduler = ConditionScheduler::new();
        scheduler.activate(
            BlockCondition::AbsoluteValue {
                value: 20.0,
                relation: Relation::LessThan,
                port: PORT,
            },
            1,
            Instant::now(),
        );
        assert!(scheduler.on_telemetry(snapshot(25.0), None).is_none());
        let fulfillment = scheduler.on_telemetry(snapshot(19.5), None).unwrap();
        assert_eq!(fulfillment.telemetry.unwrap().value(PORT), Some(19.5));
    }

    #[test]
    fn any_change_keeps_fixed_baseline() {
        let mut scheduler = ConditionScheduler::new();
        scheduler.on_telemetry(snapshot(10.0), None);
        scheduler.activate(
            BlockCondition::AnyChange {
                delta: 5.0,
                port: PORT,
            },
            1,
            Instant::now(),
        );
        assert!(scheduler.on_telemetry(snapshot(14.0), None).is_none());
        assert!(scheduler.on_telemetry(snapshot(13.0), None).is_none());
        assert!(scheduler.on_telemetry(snapshot(15.0), None).is_some());
    }

    #[test]
    fn any_change_counts_a_drop_as_movement() {
        let mut scheduler = ConditionScheduler::new();
        scheduler.on_telemetry(snapshot(10.0), None);
        scheduler.activate(
            BlockCondition::AnyChange {
                delta: 5.0,
                port: PORT,
            },
            1,
            Instant::now(),
        );
        assert!(scheduler.on_telemetry(snapshot(6.0), None).is_none());
        let fulfillment = scheduler.on_telemetry(snapshot(5.0), None).unwrap();
        assert_eq!(fulfillment.telemetry.unwrap().value(PORT), Some(5.0));
    }

    #[test]
    fn rate_change_uses_rolling_baseline() {
        let mut scheduler = ConditionScheduler::new();
        scheduler.on_telemetry(snapshot(10.0), None);
        scheduler.activate(
            BlockCondition::RateChange {
                delta: -3.0,
                port: PORT,
            },
            1,
            Instant::now(),
        );
        // cumulative -4 over two cycles never counts
        assert!(scheduler.on_telemetry(snapshot(8.0), None).is_none());
        assert!(scheduler.on_telemetry(snapshot(6.0), None).is_none());
        assert!(scheduler.on_telemetry(snapshot(3.0), None).is_some());
    }

    #[test]
    fn busy_conditions_check_and_wait_for_not_busy() {
        let mut scheduler = ConditionScheduler::new();
        scheduler.activate(
            BlockCondition::OutputBusy {
                ports: vec![OutputPort::A, OutputPort::B],
            },
            5,
            Instant::now(),
        );
        assert_eq!(
            scheduler.busy_check(),
            Some(ReplyOperation::OutputTest {
                ports: vec![OutputPort::A, OutputPort::B]
            })
        );
        assert!(scheduler.on_telemetry(snapshot(0.0), Some(true)).is_none());
        assert!(scheduler.on_telemetry(snapshot(0.0), None).is_none());
        assert!(scheduler.on_telemetry(snapshot(0.0), Some(false)).is_some());
        assert_eq!(scheduler.busy_check(), None);

        scheduler.activate(BlockCondition::SoundNotBusy, 6, Instant::now());
        assert_eq!(scheduler.busy_check(), Some(ReplyOperation::SoundTest));
    }

    #[test]
    fn newer_condition_supersedes_pending_one() {
        let mut scheduler = ConditionScheduler::new();
        let now = Instant::now();
        scheduler.activate(BlockCondition::SoundNotBusy, 1, now);
        let events = scheduler.activate(BlockCondition::Reply, 2, now);
        assert_eq!(events, vec![SchedulerEvent::Superseded { sequence: 1 }]);
    }

    #[test]
    fn time_condition_still_fires_after_replacement() {
        let mut scheduler = ConditionScheduler::new();
        let now = Instant::now();
        scheduler.activate(BlockCondition::Time { milliseconds: 10 }, 1, now);
        assert!(scheduler.activate(BlockCondition::Reply, 2, now).is_empty());
        let events = scheduler.poll_deadline(now + Duration::from_millis(10));
        assert_eq!(events.len(), 1);
        assert_eq!(scheduler.active_sequence(), Some(2));
    }
}
