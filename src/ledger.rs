use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{Engine, EngineError};
use crate::model::{ReservationId, ReservationRequest};

/// What a booking draft needs from the reservation ledger. `Engine` is the
/// production implementation.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Re-check availability and book atomically.
    async fn create_reservation(
        &self,
        req: &ReservationRequest,
    ) -> Result<ReservationId, EngineError>;
}

#[async_trait]
impl Ledger for Engine {
    async fn create_reservation(
        &self,
        req: &ReservationRequest,
    ) -> Result<ReservationId, EngineError> {
        Engine::create_reservation(self, req).await
    }
}

#[async_trait]
impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    async fn create_reservation(
        &self,
        req: &ReservationRequest,
    ) -> Result<ReservationId, EngineError> {
        (**self).create_reservation(req).await
    }
}
