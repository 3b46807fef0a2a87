use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Occupancy state of a single physical slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotStatus {
    Available,
    Occupied,
    Reserved,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "AVAILABLE",
            SlotStatus::Occupied => "OCCUPIED",
            SlotStatus::Reserved => "RESERVED",
        }
    }

    /// Case-insensitive parse of the wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AVAILABLE" => Some(SlotStatus::Available),
            "OCCUPIED" => Some(SlotStatus::Occupied),
            "RESERVED" => Some(SlotStatus::Reserved),
            _ => None,
        }
    }
}

/// Lifecycle of a booking. `Reserved` and `Occupied` hold the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Reserved,
    Occupied,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Reserved | BookingStatus::Occupied)
    }

    /// The status a slot should show while this booking is its latest.
    pub fn slot_status(&self) -> SlotStatus {
        match self {
            BookingStatus::Reserved => SlotStatus::Reserved,
            BookingStatus::Occupied => SlotStatus::Occupied,
            BookingStatus::Completed | BookingStatus::Cancelled => SlotStatus::Available,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Reserved => "RESERVED",
            BookingStatus::Occupied => "OCCUPIED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RESERVED" => Some(BookingStatus::Reserved),
            "OCCUPIED" => Some(BookingStatus::Occupied),
            "COMPLETED" => Some(BookingStatus::Completed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub lot_id: Ulid,
    pub number: u32,
    pub status: SlotStatus,
    pub last_updated: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub lot_id: Ulid,
    pub slot_id: Ulid,
    pub status: BookingStatus,
    pub checkin_time: Option<Ms>,
    pub checkout_time: Option<Ms>,
    pub created_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Everything owned by one lot. A single lock guards the whole struct, so a
/// slot change and the lot's availability count always move together.
#[derive(Debug, Clone)]
pub struct LotState {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    /// Fixed at creation.
    pub total_slots: u32,
    /// Derived from `slots`; see `engine::availability::recompute`.
    pub available_slots: u32,
    pub created_at: Ms,
    /// Slots sorted by `number`.
    pub slots: Vec<Slot>,
    /// Keyed by booking id; ULID order is creation order.
    pub bookings: BTreeMap<Ulid, Booking>,
    /// Set under the write lock when the lot is deleted, so writers that
    /// raced the delete see it once they get the lock.
    pub deleted: bool,
}

impl LotState {
    pub fn new(id: Ulid, name: String, location: Option<String>, total_slots: u32, created_at: Ms) -> Self {
        Self {
            id,
            name,
            location,
            total_slots,
            available_slots: 0,
            created_at,
            slots: Vec::new(),
            bookings: BTreeMap::new(),
            deleted: false,
        }
    }

    /// Insert slot maintaining sort order by number.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.number, |s| s.number)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slot(&self, id: Ulid) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn slot_mut(&mut self, id: Ulid) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    pub fn has_slot_number(&self, number: u32) -> bool {
        self.slots
            .binary_search_by_key(&number, |s| s.number)
            .is_ok()
    }

    /// Set a slot's status and stamp it. No-op for unknown slots.
    pub fn set_slot_status(&mut self, id: Ulid, status: SlotStatus, at: Ms) {
        if let Some(slot) = self.slot_mut(id) {
            slot.status = status;
            slot.last_updated = at;
        }
    }

    pub fn active_booking_for(&self, slot_id: Ulid) -> Option<&Booking> {
        self.bookings
            .values()
            .find(|b| b.slot_id == slot_id && b.is_active())
    }

    /// Drop every booking that references `slot_id`, returning their ids.
    pub fn remove_bookings_for_slot(&mut self, slot_id: Ulid) -> Vec<Ulid> {
        let ids: Vec<Ulid> = self
            .bookings
            .values()
            .filter(|b| b.slot_id == slot_id)
            .map(|b| b.id)
            .collect();
        for id in &ids {
            self.bookings.remove(id);
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub registered_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// Pre-validated caller identity. The engine trusts the pairing as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Ulid,
    pub role: Role,
}

impl Identity {
    pub fn user(user_id: Ulid) -> Self {
        Self { user_id, role: Role::User }
    }

    pub fn admin(user_id: Ulid) -> Self {
        Self { user_id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Partial lot edit. `location: Some(None)` clears the location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LotPatch {
    pub name: Option<String>,
    pub location: Option<Option<String>>,
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        username: String,
        at: Ms,
    },
    LotCreated {
        id: Ulid,
        name: String,
        location: Option<String>,
        total_slots: u32,
        /// `(slot_id, slot_number)` for every slot the lot starts with.
        slots: Vec<(Ulid, u32)>,
        at: Ms,
    },
    LotUpdated {
        id: Ulid,
        name: String,
        location: Option<String>,
    },
    LotDeleted {
        id: Ulid,
    },
    SlotCreated {
        id: Ulid,
        lot_id: Ulid,
        number: u32,
        at: Ms,
    },
    SlotStatusSet {
        id: Ulid,
        lot_id: Ulid,
        status: SlotStatus,
        at: Ms,
    },
    SlotDeleted {
        id: Ulid,
        lot_id: Ulid,
    },
    BookingReserved {
        id: Ulid,
        user_id: Ulid,
        lot_id: Ulid,
        slot_id: Ulid,
        at: Ms,
    },
    BookingCheckedIn {
        id: Ulid,
        lot_id: Ulid,
        at: Ms,
    },
    BookingCheckedOut {
        id: Ulid,
        lot_id: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        lot_id: Ulid,
        at: Ms,
    },
}

impl Event {
    /// The lot an event mutates in place. `None` for events handled at the
    /// map level (lot create/delete, users).
    pub fn lot_id(&self) -> Option<Ulid> {
        match self {
            Event::LotUpdated { id, .. } => Some(*id),
            Event::SlotCreated { lot_id, .. }
            | Event::SlotStatusSet { lot_id, .. }
            | Event::SlotDeleted { lot_id, .. }
            | Event::BookingReserved { lot_id, .. }
            | Event::BookingCheckedIn { lot_id, .. }
            | Event::BookingCheckedOut { lot_id, .. }
            | Event::BookingCancelled { lot_id, .. } => Some(*lot_id),
            Event::UserRegistered { .. } | Event::LotCreated { .. } | Event::LotDeleted { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotInfo {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    pub total_slots: u32,
    pub available_slots: u32,
    pub created_at: Ms,
}

impl From<&LotState> for LotInfo {
    fn from(lot: &LotState) -> Self {
        Self {
            id: lot.id,
            name: lot.name.clone(),
            location: lot.location.clone(),
            total_slots: lot.total_slots,
            available_slots: lot.available_slots,
            created_at: lot.created_at,
        }
    }
}

/// A booking joined with the user, lot and slot it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub booking: Booking,
    /// `None` if the user is not in the directory.
    pub username: Option<String>,
    pub lot_name: String,
    /// `None` once the slot has been deleted.
    pub slot_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotStatistics {
    pub lot_id: Ulid,
    pub lot_name: String,
    pub total_slots: u32,
    pub available: u32,
    pub occupied: u32,
    pub reserved: u32,
    /// Two decimals, e.g. `"50.00"`.
    pub occupancy_percentage: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverallStatistics {
    pub total_slots: u64,
    pub available: u64,
    pub occupied: u64,
    pub reserved: u64,
    pub occupancy_percentage: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub per_lot: Vec<LotStatistics>,
    pub overall: OverallStatistics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(lot_id: Ulid, number: u32) -> Slot {
        Slot {
            id: Ulid::new(),
            lot_id,
            number,
            status: SlotStatus::Available,
            last_updated: 0,
        }
    }

    fn booking(lot_id: Ulid, slot_id: Ulid, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            lot_id,
            slot_id,
            status,
            checkin_time: None,
            checkout_time: None,
            created_at: 0,
        }
    }

    #[test]
    fn status_spellings() {
        assert_eq!(SlotStatus::parse("available"), Some(SlotStatus::Available));
        assert_eq!(SlotStatus::parse("RESERVED"), Some(SlotStatus::Reserved));
        assert_eq!(SlotStatus::parse("COMPLETED"), None);
        assert_eq!(BookingStatus::parse("Cancelled"), Some(BookingStatus::Cancelled));
        assert_eq!(BookingStatus::Occupied.as_str(), "OCCUPIED");
        assert_eq!(SlotStatus::Occupied.as_str(), "OCCUPIED");
    }

    #[test]
    fn active_booking_states() {
        assert!(BookingStatus::Reserved.is_active());
        assert!(BookingStatus::Occupied.is_active());
        assert!(!BookingStatus::Completed.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
    }

    #[test]
    fn slots_stay_sorted_by_number() {
        let mut lot = LotState::new(Ulid::new(), "A".into(), None, 3, 0);
        lot.insert_slot(slot(lot.id, 3));
        lot.insert_slot(slot(lot.id, 1));
        lot.insert_slot(slot(lot.id, 2));
        let numbers: Vec<u32> = lot.slots.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(lot.has_slot_number(2));
        assert!(!lot.has_slot_number(4));
    }

    #[test]
    fn remove_slot_preserves_order() {
        let mut lot = LotState::new(Ulid::new(), "A".into(), None, 3, 0);
        let slots: Vec<Slot> = (1..=3).map(|n| slot(lot.id, n)).collect();
        for s in &slots {
            lot.insert_slot(s.clone());
        }
        let removed = lot.remove_slot(slots[1].id).unwrap();
        assert_eq!(removed.number, 2);
        assert_eq!(lot.slots.len(), 2);
        assert_eq!(lot.slots[0].number, 1);
        assert_eq!(lot.slots[1].number, 3);
        assert!(lot.remove_slot(Ulid::new()).is_none());
    }

    #[test]
    fn set_slot_status_stamps_time() {
        let mut lot = LotState::new(Ulid::new(), "A".into(), None, 1, 0);
        let s = slot(lot.id, 1);
        let sid = s.id;
        lot.insert_slot(s);
        lot.set_slot_status(sid, SlotStatus::Occupied, 42);
        let s = lot.slot(sid).unwrap();
        assert_eq!(s.status, SlotStatus::Occupied);
        assert_eq!(s.last_updated, 42);

        // Unknown slot is ignored
        lot.set_slot_status(Ulid::new(), SlotStatus::Reserved, 50);
        assert_eq!(lot.slot(sid).unwrap().last_updated, 42);
    }

    #[test]
    fn active_booking_lookup_ignores_terminal() {
        let mut lot = LotState::new(Ulid::new(), "A".into(), None, 1, 0);
        let s = slot(lot.id, 1);
        let done = booking(lot.id, s.id, BookingStatus::Completed);
        lot.bookings.insert(done.id, done);
        assert!(lot.active_booking_for(s.id).is_none());

        let live = booking(lot.id, s.id, BookingStatus::Occupied);
        let live_id = live.id;
        lot.bookings.insert(live.id, live);
        assert_eq!(lot.active_booking_for(s.id).map(|b| b.id), Some(live_id));
    }

    #[test]
    fn remove_bookings_for_slot_only_touches_that_slot() {
        let mut lot = LotState::new(Ulid::new(), "A".into(), None, 2, 0);
        let a = slot(lot.id, 1);
        let b = slot(lot.id, 2);
        for status in [BookingStatus::Completed, BookingStatus::Reserved] {
            let bk = booking(lot.id, a.id, status);
            lot.bookings.insert(bk.id, bk);
        }
        let other = booking(lot.id, b.id, BookingStatus::Reserved);
        let other_id = other.id;
        lot.bookings.insert(other.id, other);

        let removed = lot.remove_bookings_for_slot(a.id);
        assert_eq!(removed.len(), 2);
        assert_eq!(lot.bookings.len(), 1);
        assert!(lot.bookings.contains_key(&other_id));
    }

    #[test]
    fn booking_status_maps_to_slot_status() {
        assert_eq!(BookingStatus::Reserved.slot_status(), SlotStatus::Reserved);
        assert_eq!(BookingStatus::Occupied.slot_status(), SlotStatus::Occupied);
        assert_eq!(BookingStatus::Completed.slot_status(), SlotStatus::Available);
        assert_eq!(BookingStatus::Cancelled.slot_status(), SlotStatus::Available);
    }

    #[test]
    fn event_lot_routing() {
        let lot_id = Ulid::new();
        let e = Event::BookingCheckedIn { id: Ulid::new(), lot_id, at: 1 };
        assert_eq!(e.lot_id(), Some(lot_id));
        let e = Event::LotUpdated { id: lot_id, name: "x".into(), location: None };
        assert_eq!(e.lot_id(), Some(lot_id));
        assert_eq!(Event::LotDeleted { id: lot_id }.lot_id(), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::LotCreated {
            id: Ulid::new(),
            name: "North Garage".into(),
            location: Some("Level 2".into()),
            total_slots: 2,
            slots: vec![(Ulid::new(), 1), (Ulid::new(), 2)],
            at: 1_700_000_000_000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
