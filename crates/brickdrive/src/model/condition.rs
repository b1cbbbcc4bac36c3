//! Wait conditions attached to user commands.

use serde::{Deserialize, Serialize};

use super::port::{OutputPort, Port};

/// Comparison used by [`BlockCondition::AbsoluteValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// `<=`
    LessThanOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>=`
    GreaterThanOrEqual,
    /// `>`
    GreaterThan,
    /// `<`
    LessThan,
}

impl Relation {
    /// Whether `lhs <relation> rhs` holds.
    #[allow(clippy::float_cmp)] // Sensor values are compared exactly as reported
    pub fn holds(self, lhs: f32, rhs: f32) -> bool {
        match self {
            Self::LessThanOrEqual => lhs <= rhs,
            Self::Equal => lhs == rhs,
            Self::NotEqual => lhs != rhs,
            Self::GreaterThanOrEqual => lhs >= rhs,
            Self::GreaterThan => lhs > rhs,
            Self::LessThan => lhs < rhs,
        }
    }
}

/// When a just-sent user command counts as done.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockCondition {
    /// Done after a fixed delay, counted from dispatch.
    Time {
        /// Delay; 0 is fulfilled on dispatch.
        milliseconds: u64,
    },
    /// Done when the command's own reply arrives.
    Reply,
    /// Done when a port value satisfies `value <relation> threshold`.
    AbsoluteValue {
        /// Threshold compared against.
        value: f32,
        /// How the port value relates to the threshold.
        relation: Relation,
        /// Port whose value is watched.
        port: Port,
    },
    /// Done when the change between two consecutive telemetry samples
    /// reaches `delta` (signed).
    RateChange {
        /// Signed change per sample; negative waits for a drop.
        delta: f32,
        /// Port whose value is watched.
        port: Port,
    },
    /// Done when the value has moved at least `delta` away from where it was
    /// when the condition became active.
    AnyChange {
        /// Distance in either direction.
        delta: f32,
        /// Port whose value is watched.
        port: Port,
    },
    /// Done when none of the given motors is running.
    OutputBusy {
        /// Motors that must all be idle.
        ports: Vec<OutputPort>,
    },
    /// Done when no sound is playing.
    SoundNotBusy,
}

impl BlockCondition {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Time { .. } => "time",
            Self::Reply => "reply",
            Self::AbsoluteValue { .. } => "absolute_value",
            Self::RateChange { .. } => "rate_change",
            Self::AnyChange { .. } => "any_change",
            Self::OutputBusy { .. } => "output_busy",
            Self::SoundNotBusy => "sound_not_busy",
        }
    }

    /// Whether this condition is evaluated against telemetry polls.
    pub fn needs_telemetry(&self) -> bool {
        !matches!(self, Self::Time { .. } | Self::Reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relations_compare_left_to_right() {
        assert!(Relation::LessThanOrEqual.holds(3.0, 3.0));
        assert!(Relation::GreaterThan.holds(4.0, 3.0));
        assert!(!Relation::LessThan.holds(4.0, 3.0));
        assert!(Relation::NotEqual.holds(1.0, 2.0));
        assert!(Relation::Equal.holds(2.0, 2.0));
        assert!(Relation::GreaterThanOrEqual.holds(2.0, 2.0));
    }

    #[test]
    fn condition_json_shape() {
        let condition: BlockCondition =
            serde_json::from_str(r#"{"type":"time","milliseconds":250}"#).unwrap();
        assert_eq!(condition, BlockCondition::Time { milliseconds: 250 });
    }
}
