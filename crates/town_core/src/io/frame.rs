use serde::Serialize;
use serde_json::Value;

use crate::action::Effect;
use crate::clock::DayPhase;
use crate::error::ErrorCode;
use crate::event::{Event, EventKind};
use crate::schedule::TickReport;
use crate::world::RoomId;

/// One action as it appears in a frame.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FrameOutcome {
    pub actor: String,
    pub action: String,
    pub success: bool,
    pub narrative: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub effects: Vec<Effect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// An event without its wall-clock timestamp.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FrameEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub narrative: String,
}

impl From<&Event> for FrameEvent {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            kind: event.kind,
            room: event.room.clone(),
            actor: event.actor.clone(),
            action: event.action.clone(),
            data: event.data.clone(),
            narrative: event.narrative.clone(),
        }
    }
}

/// The deterministic per-tick record written by the batch runner.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Frame {
    pub t: u64,
    pub clock: String,
    pub phase: DayPhase,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub outcomes: Vec<FrameOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<FrameEvent>,
    #[serde(skip_serializing_if = "is_zero", default)]
    pub failures: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

pub fn make_frame(report: &TickReport) -> Frame {
    Frame {
        t: report.tick,
        clock: report.time.formatted.clone(),
        phase: report.time.phase,
        outcomes: report
            .outcomes
            .iter()
            .map(|o| FrameOutcome {
                actor: o.name.clone(),
                action: o.action.clone(),
                success: o.outcome.success,
                narrative: o.outcome.narrative.clone(),
                effects: o.outcome.effects.clone(),
                error_code: o.outcome.error_code,
            })
            .collect(),
        events: report.events.iter().map(FrameEvent::from).collect(),
        failures: report.failures,
    }
}

impl Frame {
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}
