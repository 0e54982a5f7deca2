use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure codes surfaced to clients when an action is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidAction,
    InvalidParams,
    ActionForbidden,
    CharacterDead,
    TargetNotFound,
    AlreadyActing,
    InDuel,
    WorldPaused,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidAction => "INVALID_ACTION",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::ActionForbidden => "ACTION_FORBIDDEN",
            ErrorCode::CharacterDead => "CHARACTER_DEAD",
            ErrorCode::TargetNotFound => "TARGET_NOT_FOUND",
            ErrorCode::AlreadyActing => "ALREADY_ACTING",
            ErrorCode::InDuel => "IN_DUEL",
            ErrorCode::WorldPaused => "WORLD_PAUSED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action refused for a reason the actor can understand.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{code}: {narrative}")]
pub struct Rejection {
    pub code: ErrorCode,
    pub narrative: String,
}

impl Rejection {
    pub fn new(code: ErrorCode, narrative: impl Into<String>) -> Self {
        Self {
            code,
            narrative: narrative.into(),
        }
    }

    pub fn forbidden(narrative: impl Into<String>) -> Self {
        Self::new(ErrorCode::ActionForbidden, narrative)
    }

    pub fn not_here(name: &str) -> Self {
        Self::new(ErrorCode::TargetNotFound, format!("{name} is not here."))
    }

    pub fn missing(param: &str) -> Self {
        Self::new(ErrorCode::InvalidParams, format!("Missing `{param}`."))
    }
}
