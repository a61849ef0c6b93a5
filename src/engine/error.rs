use chrono::NaiveDate;

use crate::model::{ReservationId, RestrictionId, RoomId, Stay};

/// One rejected guest field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Expected outcome when another restriction holds part of the range.
    RoomUnavailable {
        room_id: RoomId,
        stay: Stay,
        conflicting: RestrictionId,
    },
    NotFound(ReservationId),
    RoomNotFound(RoomId),
    RestrictionNotFound(RestrictionId),
    AlreadyExists(RoomId),
    AlreadyCancelled(ReservationId),
    ValidationFailed(Vec<FieldError>),
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },
    LimitExceeded(&'static str),
    StoreFailure(String),
}

impl EngineError {
    /// Only store failures may succeed on a plain retry; every other kind
    /// needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreFailure(_))
    }

    /// Per-field messages of a `ValidationFailed`, empty otherwise.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            EngineError::ValidationFailed(errs) => errs,
            _ => &[],
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} is not before end {end}")
            }
            EngineError::RoomUnavailable {
                room_id,
                stay,
                conflicting,
            } => write!(
                f,
                "room {room_id} unavailable for {stay}: held by restriction {conflicting}"
            ),
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::RestrictionNotFound(id) => write!(f, "restriction not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "room already exists: {id}"),
            EngineError::AlreadyCancelled(id) => {
                write!(f, "reservation already cancelled: {id}")
            }
            EngineError::ValidationFailed(errs) => {
                write!(f, "validation failed:")?;
                for e in errs {
                    write!(f, " {}: {};", e.field, e.message)?;
                }
                Ok(())
            }
            EngineError::InvalidTransition { state, action } => {
                write!(f, "cannot {action} a booking draft in state {state}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreFailure(e) => write!(f, "store failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
