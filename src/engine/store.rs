use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedRoomCalendar = Arc<RwLock<RoomCalendar>>;

/// In-memory image of the durable log: room calendars plus the reservation
/// ledger and the indexes linking them.
pub struct CalendarStore {
    rooms: DashMap<RoomId, SharedRoomCalendar>,
    reservations: DashMap<ReservationId, Reservation>,
    /// Reverse lookup: restriction id → room id.
    restriction_to_room: DashMap<RestrictionId, RoomId>,
    /// Reservation id → its Booking restriction, while it holds one.
    booking_of: DashMap<ReservationId, RestrictionId>,
}

impl Default for CalendarStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            restriction_to_room: DashMap::new(),
            booking_of: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: RoomId) -> bool {
        self.rooms.contains_key(&id)
    }

    pub fn get_room(&self, id: RoomId) -> Option<SharedRoomCalendar> {
        self.rooms.get(&id).map(|e| e.value().clone())
    }

    /// Room ids in ascending order.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Ledger ───────────────────────────────────────────────

    pub fn get_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.reservations.iter().map(|e| e.value().clone()).collect()
    }

    pub fn room_for_restriction(&self, id: &RestrictionId) -> Option<RoomId> {
        self.restriction_to_room.get(id).map(|e| *e.value())
    }

    pub fn booking_of(&self, reservation_id: &ReservationId) -> Option<RestrictionId> {
        self.booking_of.get(reservation_id).map(|e| *e.value())
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed transaction. `cal` is the write-locked calendar of the
    /// room the transaction touches, if it touches one.
    pub fn apply_txn(&self, mut cal: Option<&mut RoomCalendar>, txn: &Txn) {
        for event in &txn.events {
            self.apply_event(cal.as_deref_mut(), event);
        }
    }

    fn apply_event(&self, cal: Option<&mut RoomCalendar>, event: &Event) {
        match event {
            Event::RoomCreated { id, name } => {
                self.rooms.entry(*id).or_insert_with(|| {
                    Arc::new(RwLock::new(RoomCalendar::new(Room {
                        id: *id,
                        name: name.clone(),
                    })))
                });
            }
            Event::ReservationInserted(reservation) => {
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::RestrictionInserted(restriction) => {
                let Some(cal) = cal else {
                    tracing::warn!("restriction {} applied without its calendar", restriction.id);
                    return;
                };
                cal.insert_restriction(restriction.clone());
                self.restriction_to_room
                    .insert(restriction.id, restriction.room_id);
                if let Some(rid) = restriction.reservation_id {
                    self.booking_of.insert(rid, restriction.id);
                }
            }
            Event::RestrictionRemoved { id, .. } => {
                let Some(cal) = cal else {
                    tracing::warn!("restriction {id} removed without its calendar");
                    return;
                };
                if let Some(removed) = cal.remove_restriction(*id)
                    && let Some(rid) = removed.reservation_id
                {
                    self.booking_of.remove(&rid);
                }
                self.restriction_to_room.remove(id);
            }
            Event::GuestUpdated {
                id,
                guest,
                updated_at,
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.guest = guest.clone();
                    r.updated_at = *updated_at;
                }
            }
            Event::ProcessedSet {
                id,
                processed,
                updated_at,
            } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.processed = *processed;
                    r.updated_at = *updated_at;
                }
            }
            Event::ReservationCancelled { id, cancelled_at } => {
                if let Some(mut r) = self.reservations.get_mut(id) {
                    r.cancelled_at = Some(*cancelled_at);
                    r.updated_at = *cancelled_at;
                }
            }
        }
    }

    /// Minimal transactions that recreate the current state. Each booking
    /// restriction is emitted after its reservation.
    pub async fn snapshot(&self) -> Vec<Txn> {
        let mut txns = Vec::new();

        let room_ids = self.room_ids();
        let mut calendars = Vec::with_capacity(room_ids.len());
        for id in room_ids {
            let Some(cal) = self.get_room(id) else { continue };
            let guard = cal.read().await;
            txns.push(Txn::single(Event::RoomCreated {
                id,
                name: guard.room.name.clone(),
            }));
            calendars.push(guard.restrictions.clone());
        }

        let mut reservations = self.reservations();
        reservations.sort_by_key(|r| r.id);
        txns.extend(
            reservations
                .into_iter()
                .map(|r| Txn::single(Event::ReservationInserted(r))),
        );

        for restrictions in calendars {
            txns.extend(
                restrictions
                    .into_iter()
                    .map(|r| Txn::single(Event::RestrictionInserted(r))),
            );
        }
        txns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ulid::Ulid;

    fn stay() -> Stay {
        Stay::new(
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 5).unwrap(),
        )
    }

    fn seeded() -> (CalendarStore, Reservation, RoomRestriction) {
        let store = CalendarStore::new();
        store.apply_txn(
            None,
            &Txn::single(Event::RoomCreated {
                id: 1,
                name: "General's Quarters".into(),
            }),
        );
        let now = Utc::now();
        let reservation = Reservation {
            id: Ulid::new(),
            room_id: 1,
            guest: GuestDetails::default(),
            stay: stay(),
            created_at: now,
            updated_at: now,
            processed: false,
            cancelled_at: None,
        };
        let restriction = RoomRestriction {
            id: Ulid::new(),
            room_id: 1,
            reservation_id: Some(reservation.id),
            kind: RestrictionKind::Booking,
            stay: stay(),
            created_at: now,
        };
        (store, reservation, restriction)
    }

    #[tokio::test]
    async fn booking_txn_links_both_rows() {
        let (store, reservation, restriction) = seeded();
        let cal = store.get_room(1).unwrap();
        let mut guard = cal.write().await;
        store.apply_txn(
            Some(&mut *guard),
            &Txn {
                events: vec![
                    Event::ReservationInserted(reservation.clone()),
                    Event::RestrictionInserted(restriction.clone()),
                ],
            },
        );
        assert_eq!(guard.restrictions.len(), 1);
        assert_eq!(store.get_reservation(&reservation.id), Some(reservation.clone()));
        assert_eq!(store.booking_of(&reservation.id), Some(restriction.id));
        assert_eq!(store.room_for_restriction(&restriction.id), Some(1));

        store.apply_txn(
            Some(&mut *guard),
            &Txn::single(Event::RestrictionRemoved {
                id: restriction.id,
                room_id: 1,
            }),
        );
        assert!(guard.restrictions.is_empty());
        assert_eq!(store.booking_of(&reservation.id), None);
        assert_eq!(store.room_for_restriction(&restriction.id), None);
    }

    #[test]
    fn room_created_twice_keeps_first() {
        let (store, _, _) = seeded();
        store.apply_txn(
            None,
            &Txn::single(Event::RoomCreated {
                id: 1,
                name: "Renamed".into(),
            }),
        );
        assert_eq!(store.room_count(), 1);
        let cal = store.get_room(1).unwrap();
        assert_eq!(cal.try_read().unwrap().room.name, "General's Quarters");
    }

    #[tokio::test]
    async fn snapshot_orders_reservation_before_restriction() {
        let (store, reservation, restriction) = seeded();
        {
            let cal = store.get_room(1).unwrap();
            let mut guard = cal.write().await;
            store.apply_txn(
                Some(&mut *guard),
                &Txn {
                    events: vec![
                        Event::ReservationInserted(reservation.clone()),
                        Event::RestrictionInserted(restriction.clone()),
                    ],
                },
            );
        }
        let txns = store.snapshot().await;
        assert_eq!(txns.len(), 3);
        assert!(matches!(txns[0].events[0], Event::RoomCreated { id: 1, .. }));
        assert!(matches!(txns[1].events[0], Event::ReservationInserted(_)));
        assert!(matches!(txns[2].events[0], Event::RestrictionInserted(_)));
    }
}
