use std::time::Instant;

use chrono::NaiveDate;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, field_length_errors, validate_guest, validate_stay};
use super::{Engine, EngineError};

/// A reservation read under its room's write lock, ready to be changed.
struct LockedReservation {
    gate: OwnedRwLockReadGuard<()>,
    calendar: OwnedRwLockWriteGuard<RoomCalendar>,
    reservation: Reservation,
}

impl Engine {
    pub async fn create_room(&self, id: RoomId, name: impl Into<String>) -> Result<(), EngineError> {
        let name = name.into();
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        let gate = self.begin_write().await;
        let catalog = self.catalog.clone().lock_owned().await;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.store.contains_room(id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.commit_holding(gate, None, catalog, Txn::single(Event::RoomCreated { id, name }))
            .await?;
        debug!("room {id} created");
        Ok(())
    }

    /// Book `req.room_id` for the requested range. The availability re-check
    /// and both inserts (reservation + booking restriction) happen under the
    /// room's write lock and land in the WAL as a single transaction.
    pub async fn create_reservation(
        &self,
        req: &ReservationRequest,
    ) -> Result<ReservationId, EngineError> {
        let started = Instant::now();
        let result = self.try_create_reservation(req).await;
        let outcome = match &result {
            Ok(id) => {
                info!("reservation {id} booked room {} for [{}, {})", req.room_id, req.start, req.end);
                "booked"
            }
            Err(EngineError::RoomUnavailable { conflicting, .. }) => {
                info!(
                    "room {} unavailable for [{}, {}): held by {conflicting}",
                    req.room_id, req.start, req.end
                );
                "unavailable"
            }
            Err(e) => {
                warn!("reservation for room {} rejected: {e}", req.room_id);
                "rejected"
            }
        };
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::RESERVATION_COMMIT_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn try_create_reservation(
        &self,
        req: &ReservationRequest,
    ) -> Result<ReservationId, EngineError> {
        let stay = validate_stay(req.start, req.end, MAX_STAY_NIGHTS)?;
        validate_guest(&req.guest)?;

        let gate = self.begin_write().await;
        let calendar = self.lock_room(req.room_id).await?;
        if calendar.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many restrictions on room"));
        }
        check_no_conflict(&calendar, &stay)?;

        let (reservation_id, now) = self.next_id()?;
        let (restriction_id, _) = self.next_id()?;

        let mut txn = Txn {
            events: Vec::with_capacity(2),
        };
        txn.events.push(Event::ReservationInserted(Reservation {
            id: reservation_id,
            room_id: req.room_id,
            guest: req.guest.clone(),
            stay,
            created_at: now,
            updated_at: now,
            processed: false,
            cancelled_at: None,
        }));

        #[cfg(test)]
        if self
            .fail_after_reservation_insert
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(EngineError::StoreFailure(
                "injected fault after reservation insert".into(),
            ));
        }

        txn.events.push(Event::RestrictionInserted(RoomRestriction {
            id: restriction_id,
            room_id: req.room_id,
            reservation_id: Some(reservation_id),
            kind: RestrictionKind::Booking,
            stay,
            created_at: now,
        }));

        self.commit(gate, Some(calendar), txn).await?;
        Ok(reservation_id)
    }

    /// Partial update of guest fields. Dates, room and status are untouched.
    pub async fn update_reservation(
        &self,
        id: ReservationId,
        update: &GuestUpdate,
    ) -> Result<Reservation, EngineError> {
        let LockedReservation {
            gate,
            calendar,
            mut reservation,
        } = self.lock_reservation(id).await?;
        if update.is_empty() {
            return Ok(reservation);
        }

        let guest = update.apply_to(&reservation.guest);
        let errors = field_length_errors(&guest);
        if !errors.is_empty() {
            return Err(EngineError::ValidationFailed(errors));
        }

        let (_, now) = self.next_id()?;
        let event = Event::GuestUpdated {
            id,
            guest: guest.clone(),
            updated_at: now,
        };
        self.commit(gate, Some(calendar), Txn::single(event)).await?;
        reservation.guest = guest;
        reservation.updated_at = now;
        debug!("reservation {id} guest fields updated");
        Ok(reservation)
    }

    /// Set the processed flag. Setting it to its current value writes nothing.
    pub async fn mark_processed(
        &self,
        id: ReservationId,
        processed: bool,
    ) -> Result<Reservation, EngineError> {
        let LockedReservation {
            gate,
            calendar,
            mut reservation,
        } = self.lock_reservation(id).await?;
        if reservation.processed == processed {
            return Ok(reservation);
        }

        let (_, now) = self.next_id()?;
        let event = Event::ProcessedSet {
            id,
            processed,
            updated_at: now,
        };
        self.commit(gate, Some(calendar), Txn::single(event)).await?;
        reservation.processed = processed;
        reservation.updated_at = now;
        info!("reservation {id} processed={processed}");
        Ok(reservation)
    }

    /// Free the reservation's dates. The reservation itself is kept and
    /// stamped with `cancelled_at`.
    pub async fn cancel_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let LockedReservation {
            gate,
            calendar,
            mut reservation,
        } = self.lock_reservation(id).await?;
        if reservation.is_cancelled() {
            return Err(EngineError::AlreadyCancelled(id));
        }

        let (_, now) = self.next_id()?;
        let mut txn = Txn { events: Vec::new() };
        if let Some(restriction_id) = self.store.booking_of(&id) {
            txn.events.push(Event::RestrictionRemoved {
                id: restriction_id,
                room_id: reservation.room_id,
            });
        }
        txn.events.push(Event::ReservationCancelled {
            id,
            cancelled_at: now,
        });
        self.commit(gate, Some(calendar), txn).await?;
        reservation.cancelled_at = Some(now);
        reservation.updated_at = now;
        info!("reservation {id} cancelled, room {} released", reservation.room_id);
        Ok(reservation)
    }

    /// Owner block: makes the room unavailable without a reservation.
    pub async fn place_block(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RestrictionId, EngineError> {
        let stay = validate_stay(start, end, MAX_QUERY_WINDOW_DAYS)?;
        let gate = self.begin_write().await;
        let calendar = self.lock_room(room_id).await?;
        if calendar.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many restrictions on room"));
        }
        check_no_conflict(&calendar, &stay)?;

        let (id, now) = self.next_id()?;
        let event = Event::RestrictionInserted(RoomRestriction {
            id,
            room_id,
            reservation_id: None,
            kind: RestrictionKind::Block,
            stay,
            created_at: now,
        });
        self.commit(gate, Some(calendar), Txn::single(event)).await?;
        info!("room {room_id} blocked for {stay}");
        Ok(id)
    }

    /// Remove an owner block. Booking restrictions go through
    /// `cancel_reservation` instead and are not found here.
    pub async fn lift_block(&self, id: RestrictionId) -> Result<RoomId, EngineError> {
        let room_id = self
            .store
            .room_for_restriction(&id)
            .ok_or(EngineError::RestrictionNotFound(id))?;
        let gate = self.begin_write().await;
        let calendar = self.lock_room(room_id).await?;
        let is_block = calendar
            .restrictions
            .iter()
            .any(|r| r.id == id && r.kind == RestrictionKind::Block);
        if !is_block {
            return Err(EngineError::RestrictionNotFound(id));
        }

        let event = Event::RestrictionRemoved { id, room_id };
        self.commit(gate, Some(calendar), Txn::single(event)).await?;
        info!("block {id} lifted from room {room_id}");
        Ok(room_id)
    }

    async fn lock_reservation(&self, id: ReservationId) -> Result<LockedReservation, EngineError> {
        let room_id = self
            .store
            .get_reservation(&id)
            .ok_or(EngineError::NotFound(id))?
            .room_id;
        let gate = self.begin_write().await;
        let calendar = self.lock_room(room_id).await?;
        // Re-read under the lock: a concurrent writer may have changed it.
        let reservation = self
            .store
            .get_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        Ok(LockedReservation {
            gate,
            calendar,
            reservation,
        })
    }

    /// Compact the WAL by rewriting it with only the transactions needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let txns = self.store.snapshot().await;
        let count = txns.len();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(super::WalCommand::Compact { txns, response: tx })
            .await
            .map_err(|_| EngineError::StoreFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreFailure(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("WAL compacted to {count} transactions");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(super::WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
