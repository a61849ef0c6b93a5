use chrono::NaiveDate;
use futures::future::join_all;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::free_stays;
use super::conflict::validate_stay;
use super::{Engine, EngineError};

impl Engine {
    /// True iff no restriction on `room_id` overlaps `[start, end)`.
    pub async fn check_room(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, EngineError> {
        let stay = validate_stay(start, end, MAX_QUERY_WINDOW_DAYS)?;
        let cal = self
            .store
            .get_room(room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let free = cal.read().await.is_free(&stay);
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "scope" => "room").increment(1);
        Ok(free)
    }

    /// Every room free for the whole of `[start, end)`, by ascending id.
    /// No free room is `Ok(vec![])`, not an error.
    pub async fn check_all_rooms(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Room>, EngineError> {
        let stay = validate_stay(start, end, MAX_QUERY_WINDOW_DAYS)?;
        let calendars: Vec<_> = self
            .store
            .room_ids()
            .into_iter()
            .filter_map(|id| self.store.get_room(id))
            .collect();

        let rooms = join_all(calendars.iter().map(|cal| async move {
            let guard = cal.read().await;
            guard.is_free(&stay).then(|| guard.room.clone())
        }))
        .await;
        metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "scope" => "all").increment(1);
        Ok(rooms.into_iter().flatten().collect())
    }

    /// Maximal free sub-ranges of `[start, end)` on one room.
    pub async fn free_stays(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Stay>, EngineError> {
        let window = validate_stay(start, end, MAX_QUERY_WINDOW_DAYS)?;
        let cal = self
            .store
            .get_room(room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = cal.read().await;
        Ok(free_stays(&guard, &window))
    }

    /// Restrictions on one room overlapping `[start, end)`, by start date.
    pub async fn room_calendar(
        &self,
        room_id: RoomId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RoomRestriction>, EngineError> {
        let window = validate_stay(start, end, MAX_QUERY_WINDOW_DAYS)?;
        let cal = self
            .store
            .get_room(room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = cal.read().await;
        Ok(guard.overlapping(&window).cloned().collect())
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<Room, EngineError> {
        let cal = self
            .store
            .get_room(room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let room = cal.read().await.room.clone();
        Ok(room)
    }

    /// Rooms by ascending id.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::new();
        for id in self.store.room_ids() {
            if let Some(cal) = self.store.get_room(id) {
                rooms.push(cal.read().await.room.clone());
            }
        }
        rooms
    }

    pub fn get_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.store
            .get_reservation(&id)
            .ok_or(EngineError::NotFound(id))
    }

    /// The booking restriction a reservation currently holds; `None` once
    /// cancelled.
    pub async fn booking_restriction(
        &self,
        id: ReservationId,
    ) -> Result<Option<RoomRestriction>, EngineError> {
        let reservation = self.get_reservation(id)?;
        let Some(restriction_id) = self.store.booking_of(&id) else {
            return Ok(None);
        };
        let cal = self
            .store
            .get_room(reservation.room_id)
            .ok_or(EngineError::RoomNotFound(reservation.room_id))?;
        let guard = cal.read().await;
        Ok(guard
            .restrictions
            .iter()
            .find(|r| r.id == restriction_id)
            .cloned())
    }

    /// All reservations, newest first.
    pub fn list_all(&self) -> Vec<Reservation> {
        let mut all = self.store.reservations();
        sort_newest_first(&mut all);
        all
    }

    /// Reservations not yet processed, newest first.
    pub fn list_new(&self) -> Vec<Reservation> {
        let mut fresh: Vec<_> = self
            .store
            .reservations()
            .into_iter()
            .filter(|r| !r.processed)
            .collect();
        sort_newest_first(&mut fresh);
        fresh
    }
}

fn sort_newest_first(reservations: &mut [Reservation]) {
    reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
