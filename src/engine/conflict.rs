use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Reserve precondition. Runs under the lot write lock, so a pass here
/// cannot be invalidated before the booking is applied.
///
/// A slot an admin forced back to AVAILABLE while a booking still holds it
/// is refused too: one slot never carries two active bookings.
pub(crate) fn check_reservable(lot: &LotState, slot_id: Ulid) -> Result<(), EngineError> {
    match lot.slot(slot_id) {
        Some(slot) if slot.status == SlotStatus::Available => {}
        _ => return Err(EngineError::SlotUnavailable(slot_id)),
    }
    if lot.active_booking_for(slot_id).is_some() {
        return Err(EngineError::SlotUnavailable(slot_id));
    }
    Ok(())
}

/// Booking transition precondition: exists, caller owns it, and it is in
/// `from`. Every failure collapses into `InvalidBooking`.
pub(crate) fn check_transition(
    lot: &LotState,
    booking_id: Ulid,
    caller: &Identity,
    from: BookingStatus,
) -> Result<(), EngineError> {
    match lot.bookings.get(&booking_id) {
        Some(b) if b.user_id == caller.user_id && b.status == from => Ok(()),
        _ => Err(EngineError::InvalidBooking(booking_id)),
    }
}

pub(crate) fn validate_lot_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("lot name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("lot name too long"));
    }
    Ok(())
}

pub(crate) fn validate_location(location: Option<&str>) -> Result<(), EngineError> {
    if location.is_some_and(|l| l.len() > MAX_LOCATION_LEN) {
        return Err(EngineError::LimitExceeded("location too long"));
    }
    Ok(())
}

pub(crate) fn validate_total_slots(total_slots: u32) -> Result<(), EngineError> {
    if total_slots == 0 {
        return Err(EngineError::InvalidInput("total_slots must be at least 1"));
    }
    if total_slots > MAX_SLOTS_PER_LOT {
        return Err(EngineError::LimitExceeded("too many slots in lot"));
    }
    Ok(())
}
