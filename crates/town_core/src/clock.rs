//! In-game calendar. The time of day is a pure function of the tick counter.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fixed::{CALENDAR_START_HOUR, TICKS_PER_HOUR};

const MINUTES_PER_DAY: u64 = 24 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPhase {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl DayPhase {
    pub const ALL: [DayPhase; 4] = [
        DayPhase::Morning,
        DayPhase::Afternoon,
        DayPhase::Evening,
        DayPhase::Night,
    ];

    pub fn for_hour(hour: u8) -> Self {
        match hour {
            6..=11 => DayPhase::Morning,
            12..=17 => DayPhase::Afternoon,
            18..=23 => DayPhase::Evening,
            _ => DayPhase::Night,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayPhase::Morning => "morning",
            DayPhase::Afternoon => "afternoon",
            DayPhase::Evening => "evening",
            DayPhase::Night => "night",
        }
    }
}

impl fmt::Display for DayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameTime {
    pub hour: u8,
    pub minute: u8,
    pub phase: DayPhase,
    pub formatted: String,
}

/// Map a tick onto the 24-hour in-game calendar, starting at 06:00.
pub fn time_for_tick(tick: u64) -> GameTime {
    let minutes_per_tick = 60 / TICKS_PER_HOUR;
    let elapsed = (tick % (TICKS_PER_HOUR * 24)) * minutes_per_tick;
    let total = (CALENDAR_START_HOUR * 60 + elapsed) % MINUTES_PER_DAY;
    let hour = (total / 60) as u8;
    let minute = (total % 60) as u8;

    let display_hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    let meridiem = if hour >= 12 { "PM" } else { "AM" };

    GameTime {
        hour,
        minute,
        phase: DayPhase::for_hour(hour),
        formatted: format!("{display_hour}:{minute:02} {meridiem}"),
    }
}
