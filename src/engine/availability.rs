use crate::model::*;

// ── Availability aggregate ────────────────────────────────────────

/// Per-status slot tally for one lot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub available: u32,
    pub occupied: u32,
    pub reserved: u32,
}

impl StatusCounts {
    /// Slots held by a car or a reservation.
    pub fn in_use(&self) -> u32 {
        self.occupied + self.reserved
    }
}

pub fn tally(slots: &[Slot]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for slot in slots {
        match slot.status {
            SlotStatus::Available => counts.available += 1,
            SlotStatus::Occupied => counts.occupied += 1,
            SlotStatus::Reserved => counts.reserved += 1,
        }
    }
    counts
}

/// Recount AVAILABLE slots and store the result on the lot.
///
/// Always derived from the slot list, never adjusted incrementally, so
/// calling it any number of times after any sequence of changes converges
/// on the same value. Caller holds the lot's write lock.
pub fn recompute(lot: &mut LotState) -> u32 {
    let available = tally(&lot.slots).available;
    let stored = if available > lot.total_slots {
        tracing::warn!(
            "lot {}: {available} available slots exceeds total {}, clamping",
            lot.id,
            lot.total_slots
        );
        lot.total_slots
    } else {
        available
    };
    lot.available_slots = stored;
    stored
}

/// `in_use / total * 100`, two decimals. Zero total reads as `"0.00"`.
pub fn occupancy_percentage(in_use: u64, total: u64) -> String {
    if total == 0 {
        return "0.00".to_string();
    }
    format!("{:.2}", in_use as f64 / total as f64 * 100.0)
}

pub fn lot_statistics(lot: &LotState) -> LotStatistics {
    let counts = tally(&lot.slots);
    LotStatistics {
        lot_id: lot.id,
        lot_name: lot.name.clone(),
        total_slots: lot.total_slots,
        available: counts.available,
        occupied: counts.occupied,
        reserved: counts.reserved,
        occupancy_percentage: occupancy_percentage(
            u64::from(counts.in_use()),
            u64::from(lot.total_slots),
        ),
    }
}

/// Fold per-lot rows into the facility-wide figure.
pub fn overall_statistics(per_lot: &[LotStatistics]) -> OverallStatistics {
    let mut total_slots = 0u64;
    let mut available = 0u64;
    let mut occupied = 0u64;
    let mut reserved = 0u64;
    for s in per_lot {
        total_slots += u64::from(s.total_slots);
        available += u64::from(s.available);
        occupied += u64::from(s.occupied);
        reserved += u64::from(s.reserved);
    }
    OverallStatistics {
        total_slots,
        available,
        occupied,
        reserved,
        occupancy_percentage: occupancy_percentage(occupied + reserved, total_slots),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn lot_with(statuses: &[SlotStatus]) -> LotState {
        let mut lot = LotState::new(Ulid::new(), "Lot".into(), None, statuses.len() as u32, 0);
        for (i, status) in statuses.iter().enumerate() {
            lot.insert_slot(Slot {
                id: Ulid::new(),
                lot_id: lot.id,
                number: i as u32 + 1,
                status: *status,
                last_updated: 0,
            });
        }
        lot
    }

    use SlotStatus::{Available as A, Occupied as O, Reserved as R};

    #[test]
    fn tally_counts_each_status() {
        let lot = lot_with(&[A, O, R, A, R]);
        assert_eq!(
            tally(&lot.slots),
            StatusCounts { available: 2, occupied: 1, reserved: 2 }
        );
    }

    #[test]
    fn recompute_is_idempotent() {
        let mut lot = lot_with(&[A, O, A]);
        assert_eq!(recompute(&mut lot), 2);
        assert_eq!(recompute(&mut lot), 2);
        assert_eq!(lot.available_slots, 2);
    }

    #[test]
    fn recompute_ignores_stale_stored_value() {
        let mut lot = lot_with(&[A, A, R]);
        lot.available_slots = 0; // drifted
        assert_eq!(recompute(&mut lot), 2);
    }

    #[test]
    fn recompute_clamps_to_total() {
        let mut lot = lot_with(&[A, A, A]);
        lot.total_slots = 2;
        assert_eq!(recompute(&mut lot), 2);
    }

    #[test]
    fn recompute_empty_lot() {
        let mut lot = LotState::new(Ulid::new(), "Empty".into(), None, 4, 0);
        assert_eq!(recompute(&mut lot), 0);
    }

    #[test]
    fn occupancy_half_full() {
        // total 10, occupied 3, reserved 2
        assert_eq!(occupancy_percentage(5, 10), "50.00");
    }

    #[test]
    fn occupancy_rounds_to_two_decimals() {
        assert_eq!(occupancy_percentage(1, 3), "33.33");
        assert_eq!(occupancy_percentage(2, 3), "66.67");
        assert_eq!(occupancy_percentage(0, 7), "0.00");
        assert_eq!(occupancy_percentage(7, 7), "100.00");
    }

    #[test]
    fn occupancy_zero_total() {
        assert_eq!(occupancy_percentage(0, 0), "0.00");
    }

    #[test]
    fn lot_statistics_uses_fixed_total() {
        let mut lot = lot_with(&[O, O, O, R, R, A, A, A, A, A]);
        lot.name = "West".into();
        let stats = lot_statistics(&lot);
        assert_eq!(stats.lot_name, "West");
        assert_eq!(stats.total_slots, 10);
        assert_eq!(stats.occupied, 3);
        assert_eq!(stats.reserved, 2);
        assert_eq!(stats.available, 5);
        assert_eq!(stats.occupancy_percentage, "50.00");
    }

    #[test]
    fn overall_combines_lots() {
        let a = lot_statistics(&lot_with(&[O, A, A, A]));
        let b = lot_statistics(&lot_with(&[R, R, O, A]));
        let overall = overall_statistics(&[a, b]);
        assert_eq!(overall.total_slots, 8);
        assert_eq!(overall.available, 4);
        assert_eq!(overall.occupied, 2);
        assert_eq!(overall.reserved, 2);
        assert_eq!(overall.occupancy_percentage, "50.00");
    }

    #[test]
    fn overall_of_nothing() {
        let overall = overall_statistics(&[]);
        assert_eq!(overall.total_slots, 0);
        assert_eq!(overall.occupancy_percentage, "0.00");
    }
}
