use ulid::Ulid;

use crate::model::*;
use crate::observability::{BOOKING_TRANSITIONS_TOTAL, RESERVE_CONFLICTS_TOTAL};

use super::conflict::{check_reservable, check_transition, now_ms};
use super::{claim_id, Engine, EngineError};

impl Engine {
    /// Reserve an AVAILABLE slot for the caller.
    ///
    /// The availability check, the booking insert, the slot flip and the
    /// aggregate recount all happen under one lot write lock, so two callers
    /// racing for the same slot cannot both succeed.
    pub async fn reserve(
        &self,
        caller: &Identity,
        booking_id: Ulid,
        slot_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self
            .lock_slot_lot(slot_id, || EngineError::SlotUnavailable(slot_id))
            .await?;
        if self.booking_to_lot.contains_key(&booking_id) {
            return Err(EngineError::AlreadyExists(booking_id));
        }
        if let Err(e) = check_reservable(&guard, slot_id) {
            metrics::counter!(RESERVE_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }
        // A reserve in another lot may be racing for the same id.
        claim_id(&self.booking_to_lot, booking_id, guard.id)?;

        let event = Event::BookingReserved {
            id: booking_id,
            user_id: caller.user_id,
            lot_id: guard.id,
            slot_id,
            at: now_ms(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.booking_to_lot.remove(&booking_id);
            return Err(e);
        }
        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "transition" => "reserve").increment(1);
        tracing::info!(
            "booking {booking_id}: user {} reserved slot {slot_id} in lot {}",
            caller.user_id,
            guard.id
        );
        booked(&guard, booking_id)
    }

    /// RESERVED → OCCUPIED. Owner only; the slot becomes OCCUPIED.
    pub async fn check_in(&self, caller: &Identity, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(caller, booking_id, BookingStatus::Reserved, "check_in", |lot_id, at| {
            Event::BookingCheckedIn { id: booking_id, lot_id, at }
        })
        .await
    }

    /// OCCUPIED → COMPLETED. Owner only; the slot is released.
    pub async fn check_out(&self, caller: &Identity, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(caller, booking_id, BookingStatus::Occupied, "check_out", |lot_id, at| {
            Event::BookingCheckedOut { id: booking_id, lot_id, at }
        })
        .await
    }

    /// RESERVED → CANCELLED. Owner only; the slot is released and no
    /// checkout time is recorded.
    pub async fn cancel(&self, caller: &Identity, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(caller, booking_id, BookingStatus::Reserved, "cancel", |lot_id, at| {
            Event::BookingCancelled { id: booking_id, lot_id, at }
        })
        .await
    }

    async fn transition(
        &self,
        caller: &Identity,
        booking_id: Ulid,
        from: BookingStatus,
        label: &'static str,
        event: impl FnOnce(Ulid, Ms) -> Event,
    ) -> Result<Booking, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_booking_lot(booking_id).await?;
        check_transition(&guard, booking_id, caller, from)?;

        let event = event(guard.id, now_ms());
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "transition" => label).increment(1);
        tracing::info!("booking {booking_id}: {label} by user {}", caller.user_id);
        booked(&guard, booking_id)
    }
}

fn booked(lot: &LotState, booking_id: Ulid) -> Result<Booking, EngineError> {
    lot.bookings
        .get(&booking_id)
        .cloned()
        .ok_or(EngineError::InvalidBooking(booking_id))
}
