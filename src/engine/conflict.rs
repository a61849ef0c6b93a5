use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::model::*;

use super::availability::first_conflict;
use super::{EngineError, FieldError};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

/// `start < end` and at most `max_days` wide.
pub(crate) fn validate_stay(
    start: NaiveDate,
    end: NaiveDate,
    max_days: i64,
) -> Result<Stay, EngineError> {
    let stay = Stay::checked(start, end).ok_or(EngineError::InvalidRange { start, end })?;
    if stay.nights() > max_days {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(stay)
}

pub(crate) fn check_no_conflict(cal: &RoomCalendar, stay: &Stay) -> Result<(), EngineError> {
    match first_conflict(cal, stay) {
        Some(existing) => Err(EngineError::RoomUnavailable {
            room_id: cal.room.id,
            stay: *stay,
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}

pub(crate) fn is_email(s: &str) -> bool {
    EMAIL.is_match(s)
}

/// Guest rules for a new booking: names and email present, first name at
/// least `MIN_FIRST_NAME_LEN` characters, email well formed. Collects every
/// failing field instead of stopping at the first.
pub(crate) fn validate_guest(guest: &GuestDetails) -> Result<(), EngineError> {
    use crate::limits::*;
    let mut errors = Vec::new();

    for (field, value) in [
        ("first_name", &guest.first_name),
        ("last_name", &guest.last_name),
        ("email", &guest.email),
    ] {
        if value.trim().is_empty() {
            errors.push(FieldError::new(field, "This field cannot be blank"));
        }
    }
    let first = guest.first_name.trim();
    if !first.is_empty() && first.chars().count() < MIN_FIRST_NAME_LEN {
        errors.push(FieldError::new(
            "first_name",
            format!("This field must be at least {MIN_FIRST_NAME_LEN} characters long"),
        ));
    }
    let email = guest.email.trim();
    if !email.is_empty() && !is_email(email) {
        errors.push(FieldError::new("email", "Invalid email address"));
    }
    errors.extend(field_length_errors(guest));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::ValidationFailed(errors))
    }
}

/// Length caps only; admin edits are not held to the booking rules.
pub(crate) fn field_length_errors(guest: &GuestDetails) -> Vec<FieldError> {
    use crate::limits::MAX_GUEST_FIELD_LEN;
    [
        ("first_name", &guest.first_name),
        ("last_name", &guest.last_name),
        ("email", &guest.email),
        ("phone", &guest.phone),
    ]
    .into_iter()
    .filter(|(_, value)| value.len() > MAX_GUEST_FIELD_LEN)
    .map(|(field, _)| FieldError::new(field, format!("at most {MAX_GUEST_FIELD_LEN} bytes")))
    .collect()
}
