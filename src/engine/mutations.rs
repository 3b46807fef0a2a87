use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{now_ms, validate_location, validate_lot_name, validate_total_slots};
use super::{claim_id, new_lot_state, unindex_lot, Engine, EngineError, SharedLotState, WalCommand};

impl Engine {
    /// Resolve a login name to its user id, registering it on first sight.
    pub async fn resolve_user(&self, username: &str) -> Result<Ulid, EngineError> {
        if let Some(id) = self.usernames.get(username) {
            return Ok(*id.value());
        }
        if username.is_empty() {
            return Err(EngineError::InvalidInput("username must not be empty"));
        }
        if username.len() > MAX_USERNAME_LEN {
            return Err(EngineError::LimitExceeded("username too long"));
        }

        let _creating = self.creation.lock().await;
        // Another connection may have registered it while we waited.
        if let Some(id) = self.usernames.get(username) {
            return Ok(*id.value());
        }
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let _gate = self.commit_gate.read().await;
        let user = User {
            id: Ulid::new(),
            username: username.to_string(),
            registered_at: now_ms(),
        };
        let event = Event::UserRegistered {
            id: user.id,
            username: user.username.clone(),
            at: user.registered_at,
        };
        self.wal_append(&event).await?;
        let id = user.id;
        self.insert_user(user);
        tracing::info!("registered user {username} as {id}");
        Ok(id)
    }

    /// Create a lot together with slots numbered `1..=total_slots`.
    pub async fn create_lot(
        &self,
        id: Ulid,
        name: String,
        location: Option<String>,
        total_slots: u32,
    ) -> Result<LotInfo, EngineError> {
        validate_lot_name(&name)?;
        validate_location(location.as_deref())?;
        validate_total_slots(total_slots)?;
        let _creating = self.creation.lock().await;
        if self.lots.len() >= MAX_LOTS {
            return Err(EngineError::LimitExceeded("too many lots"));
        }
        let _gate = self.commit_gate.read().await;
        if self.lots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let slots: Vec<(Ulid, u32)> = (1..=total_slots).map(|n| (Ulid::new(), n)).collect();
        let at = now_ms();
        let event = Event::LotCreated {
            id,
            name: name.clone(),
            location: location.clone(),
            total_slots,
            slots: slots.clone(),
            at,
        };
        self.wal_append(&event).await?;
        let lot = new_lot_state(id, &name, &location, total_slots, &slots, at, &self.slot_to_lot);
        let info = LotInfo::from(&lot);
        self.lots.insert(id, Arc::new(RwLock::new(lot)));
        tracing::info!("created lot {id} ({name}) with {total_slots} slots");
        Ok(info)
    }

    pub async fn update_lot(&self, id: Ulid, patch: LotPatch) -> Result<LotInfo, EngineError> {
        if let Some(ref name) = patch.name {
            validate_lot_name(name)?;
        }
        if let Some(ref location) = patch.location {
            validate_location(location.as_deref())?;
        }
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_lot(id, || EngineError::NotFound(id)).await?;

        let event = Event::LotUpdated {
            id,
            name: patch.name.unwrap_or_else(|| guard.name.clone()),
            location: patch.location.unwrap_or_else(|| guard.location.clone()),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(LotInfo::from(&*guard))
    }

    /// Delete a lot along with its slots and bookings.
    pub async fn delete_lot(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_lot(id, || EngineError::NotFound(id)).await?;

        self.wal_append(&Event::LotDeleted { id }).await?;
        guard.deleted = true;
        unindex_lot(&guard, &self.slot_to_lot, &self.booking_to_lot);
        self.lots.remove(&id);
        tracing::info!(
            "deleted lot {id} with {} slots and {} bookings",
            guard.slots.len(),
            guard.bookings.len()
        );
        Ok(())
    }

    /// Add one slot to an existing lot. The lot never holds more than
    /// `total_slots` slots.
    pub async fn create_slot(&self, id: Ulid, lot_id: Ulid, number: u32) -> Result<Slot, EngineError> {
        if number == 0 {
            return Err(EngineError::InvalidInput("slot numbers start at 1"));
        }
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_lot(lot_id, || EngineError::NotFound(lot_id)).await?;
        if self.slot_to_lot.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.has_slot_number(number) {
            return Err(EngineError::DuplicateSlotNumber { lot_id, number });
        }
        if guard.slots.len() >= guard.total_slots as usize {
            return Err(EngineError::LimitExceeded("lot already has total_slots slots"));
        }

        claim_id(&self.slot_to_lot, id, lot_id)?;

        let event = Event::SlotCreated { id, lot_id, number, at: now_ms() };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.slot_to_lot.remove(&id);
            return Err(e);
        }
        guard.slot(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Admin override: set a slot's status directly, ignoring bookings.
    ///
    /// A booking that still claims the slot keeps its status, so the two can
    /// disagree afterwards. Reserve still refuses such a slot.
    pub async fn set_slot_status(&self, slot_id: Ulid, status: SlotStatus) -> Result<Slot, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_slot_lot(slot_id, || EngineError::NotFound(slot_id)).await?;
        let lot_id = guard.id;

        if let Some(holder) = guard.active_booking_for(slot_id)
            && holder.status.slot_status() != status
        {
            tracing::warn!(
                "slot {slot_id} forced to {} while booking {} is {}",
                status.as_str(),
                holder.id,
                holder.status.as_str()
            );
        }

        let event = Event::SlotStatusSet { id: slot_id, lot_id, status, at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::SLOT_OVERRIDES_TOTAL).increment(1);
        guard.slot(slot_id).cloned().ok_or(EngineError::NotFound(slot_id))
    }

    /// Delete a slot and every booking that references it.
    pub async fn delete_slot(&self, slot_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_slot_lot(slot_id, || EngineError::NotFound(slot_id)).await?;
        let lot_id = guard.id;
        let event = Event::SlotDeleted { id: slot_id, lot_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Rewrite the WAL as the shortest event sequence that rebuilds the
    /// current state: users, then each lot with its slots, its bookings'
    /// lifecycle, and finally every slot's current status.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No writer is between validation and apply while this is held.
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        for user in users {
            events.push(Event::UserRegistered {
                id: user.id,
                username: user.username,
                at: user.registered_at,
            });
        }

        let mut lots: Vec<(Ulid, SharedLotState)> =
            self.lots.iter().map(|e| (*e.key(), e.value().clone())).collect();
        lots.sort_by_key(|(id, _)| *id);
        for (_, lot) in lots {
            let guard = lot.read().await;
            emit_lot(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn emit_lot(lot: &LotState, events: &mut Vec<Event>) {
    events.push(Event::LotCreated {
        id: lot.id,
        name: lot.name.clone(),
        location: lot.location.clone(),
        total_slots: lot.total_slots,
        slots: lot.slots.iter().map(|s| (s.id, s.number)).collect(),
        at: lot.created_at,
    });

    for b in lot.bookings.values() {
        events.push(Event::BookingReserved {
            id: b.id,
            user_id: b.user_id,
            lot_id: lot.id,
            slot_id: b.slot_id,
            at: b.created_at,
        });
        if let Some(at) = b.checkin_time {
            events.push(Event::BookingCheckedIn { id: b.id, lot_id: lot.id, at });
        }
        match b.status {
            BookingStatus::Completed => events.push(Event::BookingCheckedOut {
                id: b.id,
                lot_id: lot.id,
                at: b.checkout_time.unwrap_or(b.created_at),
            }),
            BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                id: b.id,
                lot_id: lot.id,
                at: b.created_at,
            }),
            BookingStatus::Reserved | BookingStatus::Occupied => {}
        }
    }

    // Bookings replayed above may have moved slots; pin each slot to what
    // it is now, admin overrides included.
    for slot in &lot.slots {
        events.push(Event::SlotStatusSet {
            id: slot.id,
            lot_id: lot.id,
            status: slot.status,
            at: slot.last_updated,
        });
    }
}
