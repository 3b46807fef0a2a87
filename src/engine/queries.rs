use ulid::Ulid;

use crate::model::*;

use super::availability::{lot_statistics, overall_statistics};
use super::{Engine, EngineError, SharedLotState};

impl Engine {
    /// Snapshot the lot handles, ordered by id, without holding any map
    /// shard across an await.
    fn lot_handles(&self) -> Vec<SharedLotState> {
        let mut lots: Vec<(Ulid, SharedLotState)> =
            self.lots.iter().map(|e| (*e.key(), e.value().clone())).collect();
        lots.sort_by_key(|(id, _)| *id);
        lots.into_iter().map(|(_, lot)| lot).collect()
    }

    pub async fn list_lots(&self) -> Vec<LotInfo> {
        let mut out = Vec::with_capacity(self.lots.len());
        for lot in self.lot_handles() {
            let guard = lot.read().await;
            if !guard.deleted {
                out.push(LotInfo::from(&*guard));
            }
        }
        out
    }

    pub async fn get_lot(&self, id: Ulid) -> Result<LotInfo, EngineError> {
        let lot = self.get_lot_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = lot.read().await;
        if guard.deleted {
            return Err(EngineError::NotFound(id));
        }
        Ok(LotInfo::from(&*guard))
    }

    /// Slots of one lot, or of every lot when `lot_id` is `None`.
    /// Ordered by lot, then slot number.
    pub async fn list_slots(&self, lot_id: Option<Ulid>) -> Result<Vec<Slot>, EngineError> {
        let lots = match lot_id {
            Some(id) => vec![self.get_lot_state(&id).ok_or(EngineError::NotFound(id))?],
            None => self.lot_handles(),
        };
        let mut out = Vec::new();
        for lot in lots {
            let guard = lot.read().await;
            if guard.deleted {
                if let Some(id) = lot_id {
                    return Err(EngineError::NotFound(id));
                }
                continue;
            }
            out.extend(guard.slots.iter().cloned());
        }
        Ok(out)
    }

    pub async fn get_slot(&self, id: Ulid) -> Result<Slot, EngineError> {
        let lot_id = self.lot_for_slot(&id).ok_or(EngineError::NotFound(id))?;
        let lot = self.get_lot_state(&lot_id).ok_or(EngineError::NotFound(id))?;
        let guard = lot.read().await;
        guard.slot(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every booking for an admin; otherwise only the caller's own.
    pub async fn list_bookings(&self, caller: &Identity) -> Vec<BookingView> {
        let mut out = Vec::new();
        for lot in self.lot_handles() {
            let guard = lot.read().await;
            if guard.deleted {
                continue;
            }
            for booking in guard.bookings.values() {
                if caller.is_admin() || booking.user_id == caller.user_id {
                    out.push(self.booking_view(&guard, booking));
                }
            }
        }
        out.sort_by_key(|v| v.booking.id);
        out
    }

    /// A booking the caller may not see reads as missing.
    pub async fn get_booking(&self, caller: &Identity, id: Ulid) -> Result<BookingView, EngineError> {
        let lot_id = self.lot_for_booking(&id).ok_or(EngineError::NotFound(id))?;
        let lot = self.get_lot_state(&lot_id).ok_or(EngineError::NotFound(id))?;
        let guard = lot.read().await;
        match guard.bookings.get(&id) {
            Some(b) if caller.is_admin() || b.user_id == caller.user_id => {
                Ok(self.booking_view(&guard, b))
            }
            _ => Err(EngineError::NotFound(id)),
        }
    }

    fn booking_view(&self, lot: &LotState, booking: &Booking) -> BookingView {
        BookingView {
            booking: booking.clone(),
            username: self.users.get(&booking.user_id).map(|u| u.username.clone()),
            lot_name: lot.name.clone(),
            slot_number: lot.slot(booking.slot_id).map(|s| s.number),
        }
    }

    /// Per-lot occupancy plus the facility-wide roll-up, counted from the
    /// slots themselves.
    pub async fn statistics(&self) -> Statistics {
        let mut per_lot = Vec::with_capacity(self.lots.len());
        for lot in self.lot_handles() {
            let guard = lot.read().await;
            if !guard.deleted {
                per_lot.push(lot_statistics(&guard));
            }
        }
        let overall = overall_statistics(&per_lot);
        Statistics { per_lot, overall }
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| (u.registered_at, u.id));
        users
    }

    pub fn username(&self, user_id: &Ulid) -> Option<String> {
        self.users.get(user_id).map(|u| u.username.clone())
    }
}
