pub mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use availability::{occupancy_percentage, StatusCounts};
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLotState = Arc<RwLock<LotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Control commands must observe every append queued before them.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so a half-written batch is not
    // prepended to the next one.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub lots: DashMap<Ulid, SharedLotState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: slot id → lot id.
    pub(super) slot_to_lot: DashMap<Ulid, Ulid>,
    /// Reverse lookup: booking id → lot id.
    pub(super) booking_to_lot: DashMap<Ulid, Ulid>,
    pub(super) users: DashMap<Ulid, User>,
    pub(super) usernames: DashMap<String, Ulid>,
    /// Serializes creation of users and lots so the existence check and the
    /// insert cannot interleave.
    pub(super) creation: Mutex<()>,
    /// Writers hold this shared from validation to apply; compaction holds
    /// it exclusively so its snapshot cannot miss an in-flight append.
    /// Always acquired before any lot lock.
    pub(super) commit_gate: RwLock<()>,
}

/// Build a lot with its initial slots, all AVAILABLE.
fn new_lot_state(
    id: Ulid,
    name: &str,
    location: &Option<String>,
    total_slots: u32,
    slots: &[(Ulid, u32)],
    at: Ms,
    slot_index: &DashMap<Ulid, Ulid>,
) -> LotState {
    let mut lot = LotState::new(id, name.to_string(), location.clone(), total_slots, at);
    for &(slot_id, number) in slots {
        lot.insert_slot(Slot {
            id: slot_id,
            lot_id: id,
            number,
            status: SlotStatus::Available,
            last_updated: at,
        });
        slot_index.insert(slot_id, id);
    }
    availability::recompute(&mut lot);
    lot
}

/// Apply a lot-scoped event (the caller holds the lot's write lock),
/// then bring the availability aggregate back in line with the slots.
fn apply_to_lot(
    lot: &mut LotState,
    event: &Event,
    slot_index: &DashMap<Ulid, Ulid>,
    booking_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::LotUpdated { name, location, .. } => {
            lot.name = name.clone();
            lot.location = location.clone();
        }
        Event::SlotCreated { id, lot_id, number, at } => {
            lot.insert_slot(Slot {
                id: *id,
                lot_id: *lot_id,
                number: *number,
                status: SlotStatus::Available,
                last_updated: *at,
            });
            slot_index.insert(*id, *lot_id);
        }
        Event::SlotStatusSet { id, status, at, .. } => {
            lot.set_slot_status(*id, *status, *at);
        }
        Event::SlotDeleted { id, .. } => {
            lot.remove_slot(*id);
            slot_index.remove(id);
            for booking_id in lot.remove_bookings_for_slot(*id) {
                booking_index.remove(&booking_id);
            }
        }
        Event::BookingReserved { id, user_id, lot_id, slot_id, at } => {
            lot.bookings.insert(*id, Booking {
                id: *id,
                user_id: *user_id,
                lot_id: *lot_id,
                slot_id: *slot_id,
                status: BookingStatus::Reserved,
                checkin_time: None,
                checkout_time: None,
                created_at: *at,
            });
            booking_index.insert(*id, *lot_id);
            lot.set_slot_status(*slot_id, SlotStatus::Reserved, *at);
        }
        Event::BookingCheckedIn { id, at, .. } => {
            if let Some(b) = lot.bookings.get_mut(id) {
                b.status = BookingStatus::Occupied;
                b.checkin_time = Some(*at);
                let slot_id = b.slot_id;
                lot.set_slot_status(slot_id, SlotStatus::Occupied, *at);
            }
        }
        Event::BookingCheckedOut { id, at, .. } => {
            if let Some(b) = lot.bookings.get_mut(id) {
                b.status = BookingStatus::Completed;
                b.checkout_time = Some(*at);
                let slot_id = b.slot_id;
                lot.set_slot_status(slot_id, SlotStatus::Available, *at);
            }
        }
        Event::BookingCancelled { id, at, .. } => {
            if let Some(b) = lot.bookings.get_mut(id) {
                b.status = BookingStatus::Cancelled;
                let slot_id = b.slot_id;
                lot.set_slot_status(slot_id, SlotStatus::Available, *at);
            }
        }
        // Handled at the map level, not here
        Event::UserRegistered { .. } | Event::LotCreated { .. } | Event::LotDeleted { .. } => {}
    }
    availability::recompute(lot);
}

/// Reserve `id` in a reverse index for `lot_id`. Ids are global, so this is
/// the only check that holds across lots; undo with `index.remove(&id)` if
/// the event never gets applied.
fn claim_id(index: &DashMap<Ulid, Ulid>, id: Ulid, lot_id: Ulid) -> Result<(), EngineError> {
    match index.entry(id) {
        Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
        Entry::Vacant(slot) => {
            slot.insert(lot_id);
            Ok(())
        }
    }
}

/// Drop a lot's slots and bookings from the reverse indices.
fn unindex_lot(lot: &LotState, slot_index: &DashMap<Ulid, Ulid>, booking_index: &DashMap<Ulid, Ulid>) {
    for slot in &lot.slots {
        slot_index.remove(&slot.id);
    }
    for booking_id in lot.bookings.keys() {
        booking_index.remove(booking_id);
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            lots: DashMap::new(),
            wal_tx,
            slot_to_lot: DashMap::new(),
            booking_to_lot: DashMap::new(),
            users: DashMap::new(),
            usernames: DashMap::new(),
            creation: Mutex::new(()),
            commit_gate: RwLock::new(()),
        };

        // Rebuild into plain structs first; nothing else can see them yet.
        let mut lots: HashMap<Ulid, LotState> = HashMap::new();
        for event in &events {
            match event {
                Event::UserRegistered { id, username, at } => {
                    engine.insert_user(User {
                        id: *id,
                        username: username.clone(),
                        registered_at: *at,
                    });
                }
                Event::LotCreated { id, name, location, total_slots, slots, at } => {
                    let lot = new_lot_state(*id, name, location, *total_slots, slots, *at, &engine.slot_to_lot);
                    lots.insert(*id, lot);
                }
                Event::LotDeleted { id } => {
                    if let Some(lot) = lots.remove(id) {
                        unindex_lot(&lot, &engine.slot_to_lot, &engine.booking_to_lot);
                    }
                }
                other => {
                    if let Some(lot) = other.lot_id().and_then(|lot_id| lots.get_mut(&lot_id)) {
                        apply_to_lot(lot, other, &engine.slot_to_lot, &engine.booking_to_lot);
                    }
                }
            }
        }
        for (id, lot) in lots {
            engine.lots.insert(id, Arc::new(RwLock::new(lot)));
        }

        if !events.is_empty() {
            tracing::info!(
                "replayed {} events: {} lots, {} users",
                events.len(),
                engine.lots.len(),
                engine.users.len()
            );
        }
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_lot_state(&self, id: &Ulid) -> Option<SharedLotState> {
        self.lots.get(id).map(|e| e.value().clone())
    }

    pub fn lot_for_slot(&self, slot_id: &Ulid) -> Option<Ulid> {
        self.slot_to_lot.get(slot_id).map(|e| *e.value())
    }

    pub fn lot_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_lot.get(booking_id).map(|e| *e.value())
    }

    fn insert_user(&self, user: User) {
        self.usernames.insert(user.username.clone(), user.id);
        self.users.insert(user.id, user);
    }

    /// WAL-append then apply, under the caller's lot write lock.
    pub(super) async fn persist_and_apply(
        &self,
        lot: &mut LotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_lot(lot, event, &self.slot_to_lot, &self.booking_to_lot);
        Ok(())
    }

    /// Write-lock a live lot. `missing` builds the error for an unknown or
    /// deleted lot so callers can report it in their own terms.
    pub(super) async fn lock_lot(
        &self,
        lot_id: Ulid,
        missing: impl Fn() -> EngineError,
    ) -> Result<OwnedRwLockWriteGuard<LotState>, EngineError> {
        let lot = self.get_lot_state(&lot_id).ok_or_else(&missing)?;
        let guard = lot.write_owned().await;
        if guard.deleted {
            return Err(missing());
        }
        Ok(guard)
    }

    /// Lookup slot → lot, acquire the lot's write lock.
    pub(super) async fn lock_slot_lot(
        &self,
        slot_id: Ulid,
        missing: impl Fn() -> EngineError,
    ) -> Result<OwnedRwLockWriteGuard<LotState>, EngineError> {
        let lot_id = self.lot_for_slot(&slot_id).ok_or_else(&missing)?;
        let guard = self.lock_lot(lot_id, &missing).await?;
        // Slot may have been deleted between the index read and the lock.
        if guard.slot(slot_id).is_none() {
            return Err(missing());
        }
        Ok(guard)
    }

    /// Lookup booking → lot, acquire the lot's write lock.
    pub(super) async fn lock_booking_lot(
        &self,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<LotState>, EngineError> {
        let missing = || EngineError::InvalidBooking(booking_id);
        let lot_id = self.lot_for_booking(&booking_id).ok_or_else(missing)?;
        self.lock_lot(lot_id, missing).await
    }
}
