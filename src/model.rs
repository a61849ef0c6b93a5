use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type RoomId = u32;
pub type ReservationId = Ulid;
pub type RestrictionId = Ulid;

/// Half-open date range `[start, end)`. `end` is the checkout day, so the
/// night of `end` is not part of the stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Stay {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "Stay start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn checked(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection with `window`, or `None` when they don't overlap.
    pub fn clamp_to(&self, window: &Stay) -> Option<Stay> {
        Stay::checked(self.start.max(window.start), self.end.min(window.end))
    }
}

impl std::fmt::Display for Stay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// Why a room is unavailable for a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Held by a confirmed reservation.
    Booking,
    /// Placed manually by the owner.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    /// Set for `Booking`, `None` for `Block`.
    pub reservation_id: Option<ReservationId>,
    pub kind: RestrictionKind,
    pub stay: Stay,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// Partial guest-field update. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl GuestUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
    }

    pub fn apply_to(&self, guest: &GuestDetails) -> GuestDetails {
        GuestDetails {
            first_name: self.first_name.clone().unwrap_or_else(|| guest.first_name.clone()),
            last_name: self.last_name.clone().unwrap_or_else(|| guest.last_name.clone()),
            email: self.email.clone().unwrap_or_else(|| guest.email.clone()),
            phone: self.phone.clone().unwrap_or_else(|| guest.phone.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub guest: GuestDetails,
    pub stay: Stay,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}

/// Everything needed to book a room; what a finished draft hands the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub room_id: RoomId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub guest: GuestDetails,
}

/// A room's calendar: its restrictions sorted by `stay.start`. Restrictions on
/// one room never overlap, so they are sorted by `stay.end` as well.
#[derive(Debug, Clone)]
pub struct RoomCalendar {
    pub room: Room,
    pub restrictions: Vec<RoomRestriction>,
}

impl RoomCalendar {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
        }
    }

    /// Insert restriction maintaining sort order by stay.start.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.stay.start, |r| r.stay.start)
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: RestrictionId) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    /// Return only restrictions whose stay overlaps the query window.
    /// Uses binary search to skip restrictions starting at or after `query.end`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.stay.start < query.end);
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.stay.end > query.start)
    }

    pub fn is_free(&self, query: &Stay) -> bool {
        self.overlapping(query).next().is_none()
    }
}

/// The event types, flat. Grouped into a `Txn` for the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        name: String,
    },
    ReservationInserted(Reservation),
    RestrictionInserted(RoomRestriction),
    RestrictionRemoved {
        id: RestrictionId,
        room_id: RoomId,
    },
    GuestUpdated {
        id: ReservationId,
        guest: GuestDetails,
        updated_at: DateTime<Utc>,
    },
    ProcessedSet {
        id: ReservationId,
        processed: bool,
        updated_at: DateTime<Utc>,
    },
    ReservationCancelled {
        id: ReservationId,
        cancelled_at: DateTime<Utc>,
    },
}

impl Event {
    /// The room whose calendar this event touches, if any.
    pub fn calendar_room(&self) -> Option<RoomId> {
        match self {
            Event::RestrictionInserted(r) => Some(r.room_id),
            Event::RestrictionRemoved { room_id, .. } => Some(*room_id),
            _ => None,
        }
    }
}

/// Events that commit together. This is the WAL record format: one frame per
/// `Txn`, so a torn write loses the whole transaction and never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txn {
    pub events: Vec<Event>,
}

impl Txn {
    pub fn single(event: Event) -> Self {
        Self {
            events: vec![event],
        }
    }
}
