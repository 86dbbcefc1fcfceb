//! Topic classification
//!
//! A fixed, ordered table of topic shapes decides what a message is. The first
//! matching rule wins. Device ids are extracted separately, always from the
//! second-to-last path segment.

use std::fmt;

use crate::registry::DeviceId;
use Segment::{Id, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    State,
    Telemetry,
    Discovery,
    LastWill,
    Unrecognized,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageKind::State => write!(f, "state"),
            MessageKind::Telemetry => write!(f, "telemetry"),
            MessageKind::Discovery => write!(f, "discovery"),
            MessageKind::LastWill => write!(f, "last will"),
            MessageKind::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Segment {
    Literal(&'static str),
    /// Any non-empty segment
    Id,
}

struct TopicRule {
    shape: &'static [Segment],
    kind: MessageKind,
}

impl TopicRule {
    fn matches(&self, topic: &str) -> bool {
        let mut segments = topic.split('/');
        for expected in self.shape {
            let matched = match (expected, segments.next()) {
                (_, None) => false,
                (Segment::Literal(literal), Some(segment)) => *literal == segment,
                (Segment::Id, Some(segment)) => !segment.is_empty(),
            };
            if !matched {
                return false;
            }
        }
        segments.next().is_none()
    }
}

const TOPIC_RULES: &[TopicRule] = &[
    TopicRule {
        shape: &[Literal("tele"), Id, Literal("STATE")],
        kind: MessageKind::State,
    },
    TopicRule {
        shape: &[Literal("tele"), Id, Literal("SENSOR")],
        kind: MessageKind::Telemetry,
    },
    TopicRule {
        shape: &[Literal("tasmota"), Literal("discovery"), Id, Literal("config")],
        kind: MessageKind::Discovery,
    },
    TopicRule {
        shape: &[Literal("tele"), Id, Literal("LWT")],
        kind: MessageKind::LastWill,
    },
];

pub fn classify(topic: &str) -> MessageKind {
    TOPIC_RULES
        .iter()
        .find(|rule| rule.matches(topic))
        .map(|rule| rule.kind)
        .unwrap_or(MessageKind::Unrecognized)
}

/// Second-to-last path segment, if the topic has one and it is non-empty
pub fn device_id_from_topic(topic: &str) -> Option<DeviceId> {
    let mut segments = topic.rsplit('/');
    segments.next()?;
    segments
        .next()
        .filter(|segment| !segment.is_empty())
        .map(DeviceId::from)
}
