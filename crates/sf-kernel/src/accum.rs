//! Sharded partial-sum accumulation for one processing block.
//!
//! Many concurrent per-pixel evaluations add into the same per-source
//! gradient slots; a bank is one shard of those sums. A [`BlockAccumulator`]
//! owns `n_banks` shards and reduces them element-wise exactly once, at the
//! barrier after the block's pixel loop. No worker ever reads a running sum
//! mid-block, and no atomics are involved: contention is traded for memory by
//! raising the bank count, and the parallel driver gives each worker a
//! private bank merged in an explicit reduction pass.

use sf_core::limits::{ACCUM_SLOTS, NPARAMS};

/// One partial-sum buffer: a gradient slot per (source, parameter) pair plus
/// the block-total slot at the end.
#[derive(Debug, Clone)]
pub struct AccumulatorBank {
    slots: Box<[f32; ACCUM_SLOTS]>,
}

impl AccumulatorBank {
    /// A zeroed bank.
    pub fn new() -> Self {
        Self { slots: Box::new([0.0; ACCUM_SLOTS]) }
    }

    /// Base slot index of `source`'s gradient vector.
    #[inline(always)]
    pub fn source_base(source: usize) -> usize {
        source * NPARAMS
    }

    /// Add `v` into gradient slot `slot`.
    #[inline(always)]
    pub fn add(&mut self, slot: usize, v: f32) {
        self.slots[slot] += v;
    }

    /// Add `v` into the block-total slot.
    #[inline(always)]
    pub fn add_total(&mut self, v: f32) {
        self.slots[ACCUM_SLOTS - 1] += v;
    }

    /// Fold another bank into this one, element-wise.
    pub fn merge(&mut self, other: &AccumulatorBank) {
        for (a, b) in self.slots.iter_mut().zip(other.slots.iter()) {
            *a += b;
        }
    }

    /// The block-total slot.
    pub fn total(&self) -> f32 {
        self.slots[ACCUM_SLOTS - 1]
    }

    /// The gradient slots, source-major.
    pub fn gradient(&self) -> &[f32] {
        &self.slots[..ACCUM_SLOTS - 1]
    }

    /// Zero every slot.
    pub fn reset(&mut self) {
        self.slots.fill(0.0);
    }
}

impl Default for AccumulatorBank {
    fn default() -> Self {
        Self::new()
    }
}

/// The bank set of one processing block.
#[derive(Debug)]
pub struct BlockAccumulator {
    banks: Vec<AccumulatorBank>,
}

impl BlockAccumulator {
    /// A block accumulator with `n_banks` zeroed shards.
    pub fn new(n_banks: usize) -> Self {
        debug_assert!(n_banks >= 1);
        Self { banks: (0..n_banks.max(1)).map(|_| AccumulatorBank::new()).collect() }
    }

    /// Number of shards.
    pub fn n_banks(&self) -> usize {
        self.banks.len()
    }

    /// The shard a worker should target, round-robin by worker index.
    #[inline(always)]
    pub fn bank_mut(&mut self, worker: usize) -> &mut AccumulatorBank {
        let n = self.banks.len();
        &mut self.banks[worker % n]
    }

    /// Reduce all shards element-wise into a single bank.
    ///
    /// This is the block barrier's read: it must only run after every worker
    /// has finished its additive updates.
    pub fn reduce(&self) -> AccumulatorBank {
        let mut out = AccumulatorBank::new();
        for bank in &self.banks {
            out.merge(bank);
        }
        out
    }

    /// Zero every shard for the next block.
    pub fn reset(&mut self) {
        for bank in &mut self.banks {
            bank.reset();
        }
    }
}
