//! # Frequency Sketch
//!
//! Purpose: Approximate per-key access frequencies for the W-TinyLFU
//! eviction policy with a concurrent Count-Min sketch of packed
//! saturating counters.
//!
//! ## Design Principles
//! 1. **Packed Counters**: Each 64-bit cell holds `64 / counter_bits`
//!    saturating counters (sixteen 4-bit counters by default), so the
//!    sketch stays small enough to live in cache.
//! 2. **Min-Of-Four**: Four independently hashed counters per
//!    fingerprint; the estimate is their minimum. Count-Min can
//!    over-estimate, never under-estimate.
//! 3. **Aging By Halving**: Every `reset_threshold` operations all
//!    counters halve, so stale hot keys fade instead of dominating
//!    forever.
//! 4. **Lock-Free**: Increments and halving use per-cell CAS; reads are
//!    plain atomic loads. The sketch never errors and never blocks.
//!
//! ## Cell Layout (default 4-bit counters)
//!
//! ```text
//! cell (64 bits):
//! +----+----+----+----+----+----+----+----+----+----+----+----+----+----+----+----+
//! | c15| c14| c13| c12| c11| c10| c9 | c8 | c7 | c6 | c5 | c4 | c3 | c2 | c1 | c0 |
//! +----+----+----+----+----+----+----+----+----+----+----+----+----+----+----+----+
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use cachet_common::config::DEFAULT_COUNTER_BITS;

/// Multiplicative seeds for the four cell hashes. Independent odd
/// constants (golden-ratio, xxHash, and Murmur3 mixers).
const SEEDS: [u64; 4] = [
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
    0xff51_afd7_ed55_8ccd,
];

/// Concurrent Count-Min sketch with periodic aging.
pub struct FrequencySketch {
    cells: Vec<AtomicU64>,
    cell_mask: usize,
    /// Saturation value of a single counter: `(1 << bits) - 1`.
    counter_mask: u64,
    /// Per-field mask applied after a cell-wide right shift, clearing
    /// the bit each counter borrows from its neighbor.
    halve_mask: u64,
    bits: u32,
    slots_per_cell: u32,
    reset_threshold: u64,
    ops: AtomicU64,
}

impl FrequencySketch {
    /// Builds a sketch sized for `max_size` entries.
    ///
    /// The cell count is the next power of two at or above `max_size`
    /// (floored at 8); the aging threshold is ten times the capacity.
    /// `counter_bits` outside 1..=8 falls back to the default width.
    pub fn new(max_size: usize, counter_bits: u32) -> Self {
        let bits = if counter_bits == 0 || counter_bits > 8 {
            DEFAULT_COUNTER_BITS
        } else {
            counter_bits
        };
        let slots_per_cell = 64 / bits;
        let counter_mask = (1u64 << bits) - 1;

        let mut halve_mask = 0u64;
        for slot in 0..slots_per_cell {
            halve_mask |= (counter_mask >> 1) << (slot * bits);
        }

        let cell_count = max_size.max(8).next_power_of_two();
        let mut cells = Vec::with_capacity(cell_count);
        cells.resize_with(cell_count, || AtomicU64::new(0));

        FrequencySketch {
            cells,
            cell_mask: cell_count - 1,
            counter_mask,
            halve_mask,
            bits,
            slots_per_cell,
            reset_threshold: (max_size as u64).saturating_mul(10).max(10),
            ops: AtomicU64::new(0),
        }
    }

    /// Cell index and in-cell bit shift for one of the four counters.
    ///
    /// The cell comes from a multiplicative hash of the fingerprint; the
    /// in-cell counter comes from fingerprint bits `4*depth .. 4*depth+4`,
    /// so no extra hashing is spent on sub-positions.
    #[inline]
    fn position(&self, fingerprint: u64, depth: usize) -> (usize, u32) {
        let mut mixed = fingerprint.wrapping_mul(SEEDS[depth]);
        mixed ^= mixed >> 33;
        let cell = (mixed as usize) & self.cell_mask;

        let nibble = ((fingerprint >> (4 * depth)) & 0xF) as u32;
        let shift = (nibble % self.slots_per_cell) * self.bits;
        (cell, shift)
    }

    /// Increments the four counters for `fingerprint`, saturating each.
    ///
    /// Every `reset_threshold` bumps, the caller that crosses the
    /// threshold runs one halving pass over all cells.
    pub fn bump(&self, fingerprint: u64) {
        for depth in 0..SEEDS.len() {
            let (cell, shift) = self.position(fingerprint, depth);
            self.try_increment(&self.cells[cell], shift);
        }

        let ops = self.ops.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if ops % self.reset_threshold == 0 {
            self.halve_all();
        }
    }

    /// Estimated access count for `fingerprint`, up to the saturation
    /// value. Allocation-free; safe against concurrent bumps.
    pub fn estimate(&self, fingerprint: u64) -> u64 {
        let mut min = u64::MAX;
        for depth in 0..SEEDS.len() {
            let (cell, shift) = self.position(fingerprint, depth);
            let count = (self.cells[cell].load(Ordering::Relaxed) >> shift) & self.counter_mask;
            min = min.min(count);
        }
        min
    }

    /// Externally triggered aging pass: every counter halves and the
    /// operation count restarts. Invoked on Clear.
    pub fn reset(&self) {
        self.halve_all();
        self.ops.store(0, Ordering::Relaxed);
    }

    fn try_increment(&self, cell: &AtomicU64, shift: u32) {
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            if (current >> shift) & self.counter_mask == self.counter_mask {
                return; // saturated
            }
            match cell.compare_exchange_weak(
                current,
                current + (1 << shift),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn halve_all(&self) {
        for cell in &self.cells {
            let mut current = cell.load(Ordering::Relaxed);
            loop {
                let halved = (current >> 1) & self.halve_mask;
                match cell.compare_exchange_weak(
                    current,
                    halved,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn estimate_tracks_bumps_monotonically() {
        let sketch = FrequencySketch::new(64, 4);
        let fp = 0xdead_beef_cafe_f00d;

        let mut last = 0;
        for _ in 0..10 {
            sketch.bump(fp);
            let estimate = sketch.estimate(fp);
            assert!(estimate >= last);
            last = estimate;
        }
        assert!(last >= 10);
    }

    #[test]
    fn counters_saturate_at_the_mask() {
        let sketch = FrequencySketch::new(64, 4);
        let fp = 0x1234_5678_9abc_def0;
        for _ in 0..100 {
            sketch.bump(fp);
        }
        assert_eq!(sketch.estimate(fp), 15);
    }

    #[test]
    fn narrow_counters_saturate_earlier() {
        let sketch = FrequencySketch::new(64, 2);
        let fp = 0x0f0f_0f0f_0f0f_0f0f;
        for _ in 0..50 {
            sketch.bump(fp);
        }
        assert_eq!(sketch.estimate(fp), 3);
    }

    #[test]
    fn reset_halves_every_counter() {
        let sketch = FrequencySketch::new(64, 4);
        let fp = 0xaaaa_bbbb_cccc_dddd;
        for _ in 0..8 {
            sketch.bump(fp);
        }
        let before = sketch.estimate(fp);
        sketch.reset();
        let after = sketch.estimate(fp);
        assert!(after <= before / 2 + 1, "before={before} after={after}");
    }

    #[test]
    fn aging_triggers_after_threshold_operations() {
        // max_size 8 -> threshold 80; saturate one key, then push enough
        // unrelated traffic to cross the threshold.
        let sketch = FrequencySketch::new(8, 4);
        let hot = 0x1111_2222_3333_4444u64;
        for _ in 0..20 {
            sketch.bump(hot);
        }
        assert_eq!(sketch.estimate(hot), 15);

        for i in 0..80u64 {
            sketch.bump(i.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        }
        assert!(sketch.estimate(hot) < 15);
    }

    #[test]
    fn concurrent_bumps_do_not_lose_the_hot_key() {
        let sketch = Arc::new(FrequencySketch::new(1024, 4));
        let fp = 0x5555_6666_7777_8888;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sketch = Arc::clone(&sketch);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        sketch.bump(fp);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 400 bumps with a capacity-1024 threshold: no aging ran, so the
        // hot key must sit at saturation.
        assert_eq!(sketch.estimate(fp), 15);
    }
}
