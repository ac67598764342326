//! # Entry Table
//!
//! Purpose: Provide the fixed-size slot array behind the cache: an
//! atomic state machine per slot, a seqlock version counter so readers
//! detect writer interference, and an atomically swappable payload cell.
//!
//! ## Design Principles
//! 1. **Single-CAS Lifecycle**: Slot states move through one
//!    compare-exchange per transition; claiming a slot means winning
//!    `Empty/Deleted -> Valid`.
//! 2. **Seqlock Versioning**: The version counter is odd while a writer
//!    is inside the slot and even otherwise. A reader that sees the same
//!    even version before and after its reads holds a consistent
//!    (fingerprint, payload, expire_at) snapshot.
//! 3. **Whole-Payload Swap**: Key and value travel together in one
//!    `Arc`, swapped atomically. A torn key is unobservable; the seqlock
//!    guards agreement between the payload and the atomic side fields.
//! 4. **Power-Of-Two Sizing**: Slot count is the next power of two at or
//!    above twice the capacity, floored at 16, so probing is masked
//!    arithmetic.
//!
//! ## Memory Ordering
//!
//! Writers store fields with Release between the odd and even version
//! bumps; readers load the version with Acquire on both sides. The state
//! machine itself uses AcqRel compare-exchange so a claimed slot's
//! subsequent writes are visible to whoever observes the new state.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use cachet_common::Value;

/// Maximum linear probe distance. Caps pathological scans when many
/// fingerprints collide into one neighborhood.
pub const PROBE_LIMIT: usize = 128;

/// Bounded retries for a seqlock-validated read before the slot is
/// treated as not matching.
const READ_RETRIES: usize = 4;

/// Lifecycle of one table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    /// Never held an entry since the last Clear. Probes stop here.
    Empty = 0,
    /// Holds a live entry.
    Valid = 1,
    /// Tombstone: held an entry that was deleted, evicted, or expired.
    /// Probes continue past it; writers may reclaim it.
    Deleted = 2,
    /// Reserved claim state; the primary paths claim directly to Valid.
    Pending = 3,
}

impl SlotState {
    fn from_raw(raw: u32) -> SlotState {
        match raw {
            0 => SlotState::Empty,
            1 => SlotState::Valid,
            2 => SlotState::Deleted,
            _ => SlotState::Pending,
        }
    }
}

/// Key and value of one entry, swapped in and out as a unit.
pub struct SlotPayload {
    pub key: Arc<str>,
    pub value: Value,
}

/// Seqlock-consistent view of an occupied slot.
pub struct SlotSnapshot {
    pub fingerprint: u64,
    pub expire_at: i64,
    pub payload: Arc<SlotPayload>,
}

/// One slot of the entry table.
pub struct Slot {
    state: AtomicU32,
    fingerprint: AtomicU64,
    /// Even when stable, odd while a writer is inside the slot.
    version: AtomicU64,
    /// Absolute expiration in clock nanoseconds; 0 means never.
    expire_at: AtomicI64,
    payload: ArcSwapOption<SlotPayload>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            state: AtomicU32::new(SlotState::Empty as u32),
            fingerprint: AtomicU64::new(0),
            version: AtomicU64::new(0),
            expire_at: AtomicI64::new(0),
            payload: ArcSwapOption::const_empty(),
        }
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint.load(Ordering::Acquire)
    }

    pub fn expire_at(&self) -> i64 {
        self.expire_at.load(Ordering::Acquire)
    }

    /// Single-CAS state transition. Success means exclusive ownership of
    /// that transition (e.g. the winner of `Valid -> Deleted` is the one
    /// deleter).
    pub fn try_transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims the seqlock: spins until the version is even and this
    /// writer wins the odd bump. Write sections are a handful of stores,
    /// so the spin is short.
    fn begin_write(&self) -> u64 {
        loop {
            let version = self.version.load(Ordering::Acquire);
            if version & 1 == 0
                && self
                    .version
                    .compare_exchange_weak(version, version + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return version;
            }
            std::hint::spin_loop();
        }
    }

    fn end_write(&self, begun: u64) {
        self.version.store(begun.wrapping_add(2), Ordering::Release);
    }

    /// Writes a freshly claimed slot: fingerprint, expiration, and
    /// payload under one seqlock section. Caller must have won the claim
    /// CAS to `Valid`.
    pub fn publish(&self, fingerprint: u64, key: Arc<str>, value: Value, expire_at: i64) {
        let begun = self.begin_write();
        self.fingerprint.store(fingerprint, Ordering::Release);
        self.expire_at.store(expire_at, Ordering::Release);
        self.payload.store(Some(Arc::new(SlotPayload { key, value })));
        self.end_write(begun);
    }

    /// In-place update of value and expiration for an existing key.
    ///
    /// Re-verifies state, fingerprint, and key inside the write section:
    /// if the slot was deleted and reclaimed for another key between the
    /// probe and the write, the update aborts and the caller keeps
    /// probing.
    pub fn try_update(&self, fingerprint: u64, key: &str, value: Value, expire_at: i64) -> bool {
        let begun = self.begin_write();
        let matched = self.state() == SlotState::Valid
            && self.fingerprint.load(Ordering::Acquire) == fingerprint;
        if matched {
            if let Some(existing) = self.payload.load_full() {
                if existing.key.as_ref() == key {
                    self.expire_at.store(expire_at, Ordering::Release);
                    self.payload.store(Some(Arc::new(SlotPayload {
                        key: Arc::clone(&existing.key),
                        value,
                    })));
                    self.end_write(begun);
                    return true;
                }
            }
        }
        self.end_write(begun);
        false
    }

    /// Seqlock-validated read of an occupied slot.
    ///
    /// Returns `None` when the slot holds no payload or a writer kept
    /// interfering past the retry limit; per the read protocol the
    /// caller then treats the slot as not matching.
    pub fn read(&self) -> Option<SlotSnapshot> {
        for _ in 0..READ_RETRIES {
            let before = self.version.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let fingerprint = self.fingerprint.load(Ordering::Acquire);
            let payload = self.payload.load_full();
            let expire_at = self.expire_at.load(Ordering::Acquire);

            if self.version.load(Ordering::Acquire) != before {
                continue;
            }
            return payload.map(|payload| SlotSnapshot {
                fingerprint,
                expire_at,
                payload,
            });
        }
        None
    }

    /// Drops the payload of a tombstoned slot so the value can be
    /// reclaimed. Skips when a new claimant already owns the slot again;
    /// its publish overwrites the cell instead.
    pub fn release_payload(&self) {
        let begun = self.begin_write();
        if self.state() == SlotState::Deleted {
            self.payload.store(None);
        }
        self.end_write(begun);
    }

    /// Returns the slot to `Empty` and drops all fields. The version
    /// counter keeps counting so in-flight readers see the change.
    pub fn reset(&self) {
        let begun = self.begin_write();
        self.state.store(SlotState::Empty as u32, Ordering::Release);
        self.fingerprint.store(0, Ordering::Release);
        self.expire_at.store(0, Ordering::Release);
        self.payload.store(None);
        self.end_write(begun);
    }
}

/// Fixed-size slot array with masked linear probing.
pub struct EntryTable {
    slots: Box<[Slot]>,
    mask: usize,
    probe_limit: usize,
}

impl EntryTable {
    /// Builds a table for `max_size` entries: the slot count is the next
    /// power of two at or above `2 * max_size`, floored at 16.
    pub fn new(max_size: usize) -> Self {
        let slot_count = max_size.saturating_mul(2).next_power_of_two().max(16);
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, Slot::new);

        EntryTable {
            slots: slots.into_boxed_slice(),
            mask: slot_count - 1,
            probe_limit: PROBE_LIMIT.min(slot_count),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Maximum probe distance for this table.
    pub fn probe_limit(&self) -> usize {
        self.probe_limit
    }

    /// First probe index for a fingerprint.
    pub fn probe_start(&self, fingerprint: u64) -> usize {
        (fingerprint as usize) & self.mask
    }

    /// Slot at a (wrapping) index.
    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index & self.mask]
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_common::value_of;

    #[test]
    fn sizing_doubles_capacity_and_floors_at_sixteen() {
        assert_eq!(EntryTable::new(1).len(), 16);
        assert_eq!(EntryTable::new(100).len(), 256);
        assert_eq!(EntryTable::new(128).len(), 256);
        assert_eq!(EntryTable::new(129).len(), 512);

        assert_eq!(EntryTable::new(4).probe_limit(), 16);
        assert_eq!(EntryTable::new(1000).probe_limit(), PROBE_LIMIT);
    }

    #[test]
    fn claim_then_publish_then_read() {
        let table = EntryTable::new(4);
        let slot = table.slot(0);
        assert_eq!(slot.state(), SlotState::Empty);
        assert!(slot.read().is_none());

        assert!(slot.try_transition(SlotState::Empty, SlotState::Valid));
        // Second claimant loses the CAS.
        assert!(!slot.try_transition(SlotState::Empty, SlotState::Valid));

        slot.publish(42, Arc::from("alpha"), value_of(7u32), 900);
        let snapshot = slot.read().expect("published entry");
        assert_eq!(snapshot.fingerprint, 42);
        assert_eq!(snapshot.expire_at, 900);
        assert_eq!(snapshot.payload.key.as_ref(), "alpha");
    }

    #[test]
    fn update_aborts_when_the_slot_changed_hands() {
        let table = EntryTable::new(4);
        let slot = table.slot(0);
        assert!(slot.try_transition(SlotState::Empty, SlotState::Valid));
        slot.publish(1, Arc::from("alpha"), value_of(1u32), 0);

        // Same fingerprint, different key: hash collision, no update.
        assert!(!slot.try_update(1, "beta", value_of(2u32), 0));
        // Different fingerprint: not this entry.
        assert!(!slot.try_update(2, "alpha", value_of(2u32), 0));
        // The real owner updates in place.
        assert!(slot.try_update(1, "alpha", value_of(3u32), 5));
        let snapshot = slot.read().unwrap();
        assert_eq!(snapshot.expire_at, 5);
    }

    #[test]
    fn release_skips_reclaimed_slots() {
        let table = EntryTable::new(4);
        let slot = table.slot(0);
        assert!(slot.try_transition(SlotState::Empty, SlotState::Valid));
        slot.publish(1, Arc::from("alpha"), value_of(1u32), 0);

        assert!(slot.try_transition(SlotState::Valid, SlotState::Deleted));
        // A new claimant takes the tombstone before the deleter released.
        assert!(slot.try_transition(SlotState::Deleted, SlotState::Valid));
        slot.release_payload();
        // The late release must not have dropped the claimant's cell.
        assert!(slot.read().is_some());
    }

    #[test]
    fn release_drops_tombstoned_payload() {
        let table = EntryTable::new(4);
        let slot = table.slot(0);
        assert!(slot.try_transition(SlotState::Empty, SlotState::Valid));
        slot.publish(1, Arc::from("alpha"), value_of(1u32), 0);

        assert!(slot.try_transition(SlotState::Valid, SlotState::Deleted));
        slot.release_payload();
        assert!(slot.read().is_none());
    }

    #[test]
    fn reset_returns_the_slot_to_empty() {
        let table = EntryTable::new(4);
        let slot = table.slot(3);
        assert!(slot.try_transition(SlotState::Empty, SlotState::Valid));
        slot.publish(9, Arc::from("alpha"), value_of(1u32), 77);

        slot.reset();
        assert_eq!(slot.state(), SlotState::Empty);
        assert_eq!(slot.fingerprint(), 0);
        assert_eq!(slot.expire_at(), 0);
        assert!(slot.read().is_none());
    }

    #[test]
    fn slot_index_wraps_with_the_mask() {
        let table = EntryTable::new(4); // 16 slots
        let slot_a = table.slot(3) as *const Slot;
        let slot_b = table.slot(19) as *const Slot;
        assert_eq!(slot_a, slot_b);
    }
}
