//! Back-office actions on reservations.
//!
//! Every action is reached from one of three listings; `Source` records which
//! so the caller can send the administrator back there afterwards.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    New,
    All,
    Calendar,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::New => "new",
            Source::All => "all",
            Source::Calendar => "cal",
        }
    }

    pub fn redirect_path(&self) -> String {
        format!("/admin/reservations-{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown reservation listing {:?}", self.0)
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Source::New),
            "all" => Ok(Source::All),
            "cal" | "calendar" => Ok(Source::Calendar),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// Everything the reservation detail page shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminView {
    pub source: Source,
    pub reservation: Reservation,
    pub room_name: String,
}

/// Where to go after an action, and what to tell the administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminOutcome {
    pub redirect_to: String,
    pub flash: &'static str,
    pub reservation: Reservation,
}

impl AdminOutcome {
    fn new(source: Source, flash: &'static str, reservation: Reservation) -> Self {
        Self {
            redirect_to: source.redirect_path(),
            flash,
            reservation,
        }
    }
}

impl Engine {
    pub async fn show_reservation(
        &self,
        source: Source,
        id: ReservationId,
    ) -> Result<AdminView, EngineError> {
        let reservation = self.get_reservation(id)?;
        let room_name = self.get_room(reservation.room_id).await?.name;
        Ok(AdminView {
            source,
            reservation,
            room_name,
        })
    }

    /// Save edited guest fields. Only length limits apply here.
    pub async fn update_guest_fields(
        &self,
        source: Source,
        id: ReservationId,
        update: &GuestUpdate,
    ) -> Result<AdminOutcome, EngineError> {
        let reservation = self.update_reservation(id, update).await?;
        Ok(AdminOutcome::new(source, "Changes saved", reservation))
    }

    /// Mark processed. Dates and availability are not re-checked.
    pub async fn process_reservation(
        &self,
        source: Source,
        id: ReservationId,
    ) -> Result<AdminOutcome, EngineError> {
        let reservation = self.mark_processed(id, true).await?;
        info!("admin processed reservation {id} from {} listing", source.as_str());
        Ok(AdminOutcome::new(
            source,
            "Reservation marked as processed",
            reservation,
        ))
    }

    /// Override: put a processed reservation back in the new listing.
    pub async fn unprocess_reservation(
        &self,
        source: Source,
        id: ReservationId,
    ) -> Result<AdminOutcome, EngineError> {
        let reservation = self.mark_processed(id, false).await?;
        info!("admin reopened reservation {id} from {} listing", source.as_str());
        Ok(AdminOutcome::new(
            source,
            "Reservation marked as new",
            reservation,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::NaiveDate;
    use ulid::Ulid;

    use super::*;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_admin");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn booked(name: &str) -> (Engine, ReservationId) {
        let engine = Engine::open(test_wal_path(name)).unwrap();
        engine.create_room(1, "General's Quarters").await.unwrap();
        let id = engine
            .create_reservation(&ReservationRequest {
                room_id: 1,
                start: d("2024-06-01"),
                end: d("2024-06-05"),
                guest: GuestDetails {
                    first_name: "Jane".into(),
                    last_name: "Doe".into(),
                    email: "jane@example.com".into(),
                    phone: "555-0100".into(),
                },
            })
            .await
            .unwrap();
        (engine, id)
    }

    #[test]
    fn source_parses_route_params() {
        assert_eq!("new".parse::<Source>(), Ok(Source::New));
        assert_eq!("all".parse::<Source>(), Ok(Source::All));
        assert_eq!("cal".parse::<Source>(), Ok(Source::Calendar));
        assert_eq!("calendar".parse::<Source>(), Ok(Source::Calendar));
        assert_eq!(
            "archive".parse::<Source>(),
            Err(UnknownSource("archive".into()))
        );
    }

    #[test]
    fn redirects_back_to_listing() {
        assert_eq!(Source::New.redirect_path(), "/admin/reservations-new");
        assert_eq!(Source::All.redirect_path(), "/admin/reservations-all");
        assert_eq!(Source::Calendar.redirect_path(), "/admin/reservations-cal");
    }

    #[tokio::test]
    async fn show_includes_room_name() {
        let (engine, id) = booked("show.wal").await;
        let view = engine.show_reservation(Source::All, id).await.unwrap();
        assert_eq!(view.room_name, "General's Quarters");
        assert_eq!(view.reservation.id, id);
        assert_eq!(view.source, Source::All);

        let missing = Ulid::new();
        assert_eq!(
            engine.show_reservation(Source::All, missing).await.unwrap_err(),
            EngineError::NotFound(missing)
        );
    }

    #[tokio::test]
    async fn process_moves_out_of_new_listing() {
        let (engine, id) = booked("process.wal").await;
        let outcome = engine.process_reservation(Source::New, id).await.unwrap();
        assert_eq!(outcome.redirect_to, "/admin/reservations-new");
        assert_eq!(outcome.flash, "Reservation marked as processed");
        assert!(outcome.reservation.processed);
        assert!(engine.list_new().is_empty());
        assert_eq!(engine.list_all().len(), 1);

        let reopened = engine.unprocess_reservation(Source::All, id).await.unwrap();
        assert!(!reopened.reservation.processed);
        assert_eq!(engine.list_new().len(), 1);
    }

    #[tokio::test]
    async fn edit_keeps_dates_and_status() {
        let (engine, id) = booked("edit.wal").await;
        let before = engine.get_reservation(id).unwrap();
        let update = GuestUpdate {
            phone: Some("555-0199".into()),
            // Admin edits skip the booking-form rules.
            first_name: Some("Jo".into()),
            ..Default::default()
        };
        let outcome = engine
            .update_guest_fields(Source::Calendar, id, &update)
            .await
            .unwrap();
        assert_eq!(outcome.flash, "Changes saved");
        assert_eq!(outcome.redirect_to, "/admin/reservations-cal");

        let after = engine.get_reservation(id).unwrap();
        assert_eq!(after.guest.phone, "555-0199");
        assert_eq!(after.guest.first_name, "Jo");
        assert_eq!(after.guest.email, before.guest.email);
        assert_eq!(after.stay, before.stay);
        assert_eq!(after.room_id, before.room_id);
        assert_eq!(after.processed, before.processed);
    }
}
