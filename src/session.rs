//! Per-session booking drafts.
//!
//! A guest builds a booking over several requests: dates, then a room, then
//! their details, then submit. Each step is a transition on that session's
//! [`BookingDraft`]; sessions never share state. Drafts live only in memory
//! and an idle draft is dropped after the configured TTL.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::engine::{validate_guest, validate_stay, EngineError};
use crate::ledger::Ledger;
use crate::limits::*;
use crate::model::*;
use crate::observability;

/// Opaque per-user key supplied by the session collaborator.
pub type SessionId = str;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChosenRoom {
    pub id: RoomId,
    pub name: String,
}

/// What the guest sees on the summary page after booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReceipt {
    pub reservation_id: ReservationId,
    pub room: ChosenRoom,
    pub stay: Stay,
    pub guest: GuestDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftState {
    NoDraft,
    DatesChosen,
    RoomChosen,
    DetailsEntered,
    Committed,
}

impl DraftState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftState::NoDraft => "no_draft",
            DraftState::DatesChosen => "dates_chosen",
            DraftState::RoomChosen => "room_chosen",
            DraftState::DetailsEntered => "details_entered",
            DraftState::Committed => "committed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BookingDraft {
    #[default]
    NoDraft,
    DatesChosen {
        stay: Stay,
    },
    RoomChosen {
        stay: Stay,
        room: ChosenRoom,
        /// Last submitted details, kept for re-display after a failed
        /// validation or a lost race for the room.
        guest: Option<GuestDetails>,
    },
    DetailsEntered {
        stay: Stay,
        room: ChosenRoom,
        guest: GuestDetails,
    },
    /// Booked. Holds only the receipt; the draft itself is spent.
    Committed(BookingReceipt),
}

impl BookingDraft {
    pub fn state(&self) -> DraftState {
        match self {
            BookingDraft::NoDraft => DraftState::NoDraft,
            BookingDraft::DatesChosen { .. } => DraftState::DatesChosen,
            BookingDraft::RoomChosen { .. } => DraftState::RoomChosen,
            BookingDraft::DetailsEntered { .. } => DraftState::DetailsEntered,
            BookingDraft::Committed(_) => DraftState::Committed,
        }
    }

    pub fn stay(&self) -> Option<Stay> {
        match self {
            BookingDraft::NoDraft => None,
            BookingDraft::DatesChosen { stay }
            | BookingDraft::RoomChosen { stay, .. }
            | BookingDraft::DetailsEntered { stay, .. } => Some(*stay),
            BookingDraft::Committed(receipt) => Some(receipt.stay),
        }
    }

    fn rejects(&self, action: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            state: self.state().as_str(),
            action,
        }
    }
}

struct Entry {
    draft: BookingDraft,
    touched: Instant,
    /// A `commit` took the draft out and will put its outcome back, unless
    /// the session moves on first.
    committing: bool,
}

/// Drafts keyed by session id.
pub struct Sessions {
    drafts: DashMap<String, Entry>,
    ttl: Duration,
}

impl Sessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            drafts: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live drafts, committed receipts included.
    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Current draft for rendering; `NoDraft` for unknown sessions.
    pub fn draft(&self, sid: &SessionId) -> BookingDraft {
        self.drafts
            .get(sid)
            .map(|e| e.draft.clone())
            .unwrap_or_default()
    }

    /// Start over with new dates. Allowed from any state. A bad range leaves
    /// the draft as it was.
    pub fn set_dates(
        &self,
        sid: &SessionId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), EngineError> {
        let stay = validate_stay(start, end, MAX_STAY_NIGHTS)?;
        self.transition(sid, |_| (BookingDraft::DatesChosen { stay }, Ok(())))
    }

    /// Pick (or switch) the room. Needs dates; keeps any entered details.
    pub fn choose_room(
        &self,
        sid: &SessionId,
        room_id: RoomId,
        room_name: impl Into<String>,
    ) -> Result<(), EngineError> {
        let room = ChosenRoom {
            id: room_id,
            name: room_name.into(),
        };
        self.transition(sid, |draft| match draft {
            BookingDraft::DatesChosen { stay } => (
                BookingDraft::RoomChosen {
                    stay,
                    room,
                    guest: None,
                },
                Ok(()),
            ),
            BookingDraft::RoomChosen { stay, guest, .. } => {
                (BookingDraft::RoomChosen { stay, room, guest }, Ok(()))
            }
            BookingDraft::DetailsEntered { stay, guest, .. } => (
                BookingDraft::RoomChosen {
                    stay,
                    room,
                    guest: Some(guest),
                },
                Ok(()),
            ),
            other => {
                let err = other.rejects("choose a room for");
                (other, Err(err))
            }
        })
    }

    /// Dates and room in one step, for a direct "book this room" link.
    pub fn book_room(
        &self,
        sid: &SessionId,
        room_id: RoomId,
        room_name: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), EngineError> {
        let stay = validate_stay(start, end, MAX_STAY_NIGHTS)?;
        let room = ChosenRoom {
            id: room_id,
            name: room_name.into(),
        };
        self.transition(sid, |_| {
            (
                BookingDraft::RoomChosen {
                    stay,
                    room,
                    guest: None,
                },
                Ok(()),
            )
        })
    }

    /// Attach guest details. On `ValidationFailed` the draft stays at
    /// `RoomChosen` holding the submitted values so the form can be re-shown.
    pub fn enter_details(&self, sid: &SessionId, guest: GuestDetails) -> Result<(), EngineError> {
        self.transition(sid, |draft| match draft {
            BookingDraft::RoomChosen { stay, room, .. }
            | BookingDraft::DetailsEntered { stay, room, .. } => match validate_guest(&guest) {
                Ok(()) => (BookingDraft::DetailsEntered { stay, room, guest }, Ok(())),
                Err(e) => (
                    BookingDraft::RoomChosen {
                        stay,
                        room,
                        guest: Some(guest),
                    },
                    Err(e),
                ),
            },
            other => {
                let err = other.rejects("enter details for");
                (other, Err(err))
            }
        })
    }

    /// Submit the draft to the ledger. Only `DetailsEntered` can commit.
    ///
    /// - Booked: the draft becomes `Committed(receipt)`.
    /// - `RoomUnavailable`: back to `RoomChosen` so the guest picks again.
    /// - Anything else: the draft is left at `DetailsEntered` for a retry.
    pub async fn commit<L: Ledger + ?Sized>(
        &self,
        sid: &SessionId,
        ledger: &L,
    ) -> Result<BookingReceipt, EngineError> {
        // Take the draft out so a second submit racing this one sees NoDraft.
        let (stay, room, guest) = {
            let Some(mut entry) = self.drafts.get_mut(sid) else {
                return Err(BookingDraft::NoDraft.rejects("commit"));
            };
            match std::mem::take(&mut entry.draft) {
                BookingDraft::DetailsEntered { stay, room, guest } => {
                    entry.touched = Instant::now();
                    entry.committing = true;
                    (stay, room, guest)
                }
                other => {
                    let err = other.rejects("commit");
                    entry.draft = other;
                    return Err(err);
                }
            }
        };

        let req = ReservationRequest {
            room_id: room.id,
            start: stay.start,
            end: stay.end,
            guest: guest.clone(),
        };
        let (next, result) = match ledger.create_reservation(&req).await {
            Ok(reservation_id) => {
                let receipt = BookingReceipt {
                    reservation_id,
                    room,
                    stay,
                    guest,
                };
                info!("session draft committed as reservation {reservation_id}");
                (BookingDraft::Committed(receipt.clone()), Ok(receipt))
            }
            Err(e @ EngineError::RoomUnavailable { .. }) => (
                BookingDraft::RoomChosen {
                    stay,
                    room,
                    guest: Some(guest),
                },
                Err(e),
            ),
            Err(e) => (BookingDraft::DetailsEntered { stay, room, guest }, Err(e)),
        };
        let outcome = if result.is_ok() { "committed" } else { "failed" };
        metrics::counter!(observability::DRAFT_COMMITS_TOTAL, "outcome" => outcome).increment(1);

        // An abandon or a new transition during the await wins over the
        // outcome; the reservation itself stands either way.
        match self.drafts.get_mut(sid) {
            Some(mut entry) if entry.committing && entry.draft == BookingDraft::NoDraft => {
                entry.draft = next;
                entry.touched = Instant::now();
                entry.committing = false;
            }
            _ => debug!("draft moved on during commit; outcome not stored"),
        }
        result
    }

    /// Hand out the receipt once and end the draft.
    pub fn take_receipt(&self, sid: &SessionId) -> Option<BookingReceipt> {
        let (_, entry) = self
            .drafts
            .remove_if(sid, |_, e| matches!(e.draft, BookingDraft::Committed(_)))?;
        match entry.draft {
            BookingDraft::Committed(receipt) => Some(receipt),
            _ => None,
        }
    }

    /// Discard the draft, whatever its state.
    pub fn abandon(&self, sid: &SessionId) {
        if self.drafts.remove(sid).is_some() {
            debug!("draft abandoned");
        }
    }

    /// Drop drafts untouched for longer than the TTL. Returns how many.
    pub fn expire_idle(&self, now: Instant) -> usize {
        let before = self.drafts.len();
        self.drafts
            .retain(|_, e| now.saturating_duration_since(e.touched) <= self.ttl);
        let expired = before.saturating_sub(self.drafts.len());
        metrics::counter!(observability::DRAFTS_EXPIRED_TOTAL).increment(expired as u64);
        metrics::gauge!(observability::DRAFTS_ACTIVE).set(self.drafts.len() as f64);
        expired
    }

    /// Apply `step` to the session's draft, creating an empty one if needed.
    /// A step that lands on `NoDraft` removes the entry unless a commit is
    /// still waiting to store its outcome there.
    fn transition<T>(
        &self,
        sid: &SessionId,
        step: impl FnOnce(BookingDraft) -> (BookingDraft, Result<T, EngineError>),
    ) -> Result<T, EngineError> {
        if sid.len() > MAX_SESSION_ID_LEN {
            return Err(EngineError::LimitExceeded("session id too long"));
        }
        let mut entry = match self.drafts.get_mut(sid) {
            Some(entry) => entry,
            None => {
                if self.drafts.len() >= MAX_DRAFTS {
                    return Err(EngineError::LimitExceeded("too many booking drafts"));
                }
                self.drafts.entry(sid.to_owned()).or_insert_with(|| Entry {
                    draft: BookingDraft::NoDraft,
                    touched: Instant::now(),
                    committing: false,
                })
            }
        };

        let from = entry.draft.state();
        let (next, result) = step(std::mem::take(&mut entry.draft));
        let to = next.state();
        entry.draft = next;
        entry.touched = Instant::now();
        if result.is_ok() {
            entry.committing = false;
        }
        drop(entry);

        if to == DraftState::NoDraft {
            self.drafts
                .remove_if(sid, |_, e| e.draft == BookingDraft::NoDraft && !e.committing);
        }
        if from != to {
            debug!("draft {} -> {}", from.as_str(), to.as_str());
        }
        result
    }
}
